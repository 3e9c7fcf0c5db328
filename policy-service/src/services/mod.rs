//! Domain services for policy-service: the condition evaluator, policy
//! selection, the transaction state machine, ACR resolution and the
//! policy config lifecycle with dry-run support.

pub mod acr;
pub mod condition;
mod database;
pub mod dry_run;
pub mod error;
mod jwt;
pub mod metrics;
pub mod policy_config;
pub mod selector;
pub mod store;
pub mod transaction;

pub use acr::AcrResolver;
pub use database::Database;
pub use dry_run::{DeletionPreview, ExecutionMode, MutationPreview};
pub use error::ServiceError;
pub use jwt::{OperatorClaims, TokenVerifier};
pub use policy_config::PolicyConfigService;
pub use transaction::{Attempt, StartedTransaction, TransactionEngine};
