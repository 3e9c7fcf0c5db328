pub mod listing;

pub use listing::{EnabledFilter, ListResponse, Page, PaginationRules, Toggleable, parse_flag};
