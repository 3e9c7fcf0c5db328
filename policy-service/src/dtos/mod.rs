pub mod policy;
pub mod transaction;

pub use policy::{DryRunQuery, PolicyConfigRequest, PolicyListQuery};
pub use transaction::{
    BeginTransactionRequest, InteractionListQuery, InteractionRequest, InteractionResult,
    TransactionListQuery, TransactionView,
};
