pub mod validation;

pub use validation::{parse_id, ValidatedJson};
