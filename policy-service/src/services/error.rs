use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use super::acr::AcrError;
use super::selector::SelectionError;
use super::store::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Tenant configuration cannot serve the request.
    #[error("{0}")]
    Configuration(String),

    #[error("Authentication transaction {0} is already completed")]
    TransactionCompleted(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<SelectionError> for ServiceError {
    fn from(err: SelectionError) -> Self {
        ServiceError::Configuration(err.to_string())
    }
}

impl From<AcrError> for ServiceError {
    fn from(err: AcrError) -> Self {
        ServiceError::Configuration(err.to_string())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::Configuration(msg) => {
                AppError::InvalidConfiguration(anyhow::anyhow!(msg))
            }
            ServiceError::TransactionCompleted(id) => AppError::TransactionCompleted(
                anyhow::anyhow!("Authentication transaction {} is already completed", id),
            ),
            ServiceError::Store(StoreError::Duplicate(what)) => {
                AppError::Conflict(anyhow::anyhow!("Duplicate {}", what))
            }
            ServiceError::Store(StoreError::VersionConflict(id)) => AppError::Conflict(
                anyhow::anyhow!("Authentication transaction {} was modified concurrently", id),
            ),
            ServiceError::Store(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
