use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    AuthenticationTransaction, InteractionFilter, InteractionOutcome, InteractionRecord,
    RequestContext, TransactionFilter, TransactionStatus,
};

#[derive(Debug, Deserialize, Validate)]
pub struct BeginTransactionRequest {
    #[validate(length(min = 1, message = "flow is required"))]
    pub flow: String,

    #[validate(length(min = 1, message = "client_id is required"))]
    pub client_id: String,

    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub acr_values: Vec<String>,
}

impl BeginTransactionRequest {
    pub fn request_context(&self) -> RequestContext {
        RequestContext {
            client_id: self.client_id.clone(),
            scopes: self.scopes.clone(),
            acr_values: self.acr_values.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct InteractionRequest {
    pub outcome: InteractionOutcome,

    #[validate(length(min = 1, message = "user_id must not be empty"))]
    pub user_id: Option<String>,

    pub payload: Option<Value>,
}

/// Wire shape of a transaction. `available_methods` is only present on the
/// response that starts a transaction.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub transaction_id: Uuid,
    pub tenant_id: Uuid,
    pub flow: String,
    #[serde(rename = "type")]
    pub interaction_type: Option<String>,
    pub status: TransactionStatus,
    pub user_id: Option<String>,
    pub request: RequestContext,
    pub interactions: Vec<InteractionRecord>,
    pub acr: Option<String>,
    pub amr: Vec<String>,
    pub denied_scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_methods: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&AuthenticationTransaction> for TransactionView {
    fn from(tx: &AuthenticationTransaction) -> Self {
        Self {
            transaction_id: tx.transaction_id,
            tenant_id: tx.tenant_id,
            flow: tx.flow.clone(),
            interaction_type: tx.last_interaction_type.clone(),
            status: tx.status,
            user_id: tx.user_id.clone(),
            request: tx.request.clone(),
            interactions: tx.interactions.values().cloned().collect(),
            acr: tx.acr.clone(),
            amr: tx.amr.clone(),
            denied_scopes: tx.denied_scopes.clone(),
            available_methods: None,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
            expires_at: tx.expires_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionListQuery {
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub client_id: Option<String>,
    pub flow: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl TransactionListQuery {
    pub fn filter(&self) -> Result<TransactionFilter, AppError> {
        let status = match self.status.as_deref() {
            None => None,
            Some(raw) => Some(TransactionStatus::from_string(raw).ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Unknown transaction status '{}'", raw))
            })?),
        };

        Ok(TransactionFilter {
            status,
            user_id: self.user_id.clone(),
            client_id: self.client_id.clone(),
            flow: self.flow.clone(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InteractionListQuery {
    pub transaction_id: Option<String>,
    #[serde(rename = "type")]
    pub interaction_type: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl InteractionListQuery {
    pub fn filter(&self) -> Result<InteractionFilter, AppError> {
        let transaction_id = match self.transaction_id.as_deref() {
            None => None,
            Some(raw) => Some(Uuid::parse_str(raw).map_err(|_| {
                AppError::BadRequest(anyhow::anyhow!("transaction_id must be a UUID"))
            })?),
        };

        Ok(InteractionFilter {
            transaction_id,
            interaction_type: self.interaction_type.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct InteractionResult {
    pub result: InteractionRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_filter_is_case_insensitive() {
        let query = TransactionListQuery {
            status: Some("locked".to_string()),
            ..Default::default()
        };
        assert_eq!(
            query.filter().unwrap().status,
            Some(TransactionStatus::Locked)
        );
    }

    #[test]
    fn test_unknown_status_is_bad_request() {
        let query = TransactionListQuery {
            status: Some("DONE".to_string()),
            ..Default::default()
        };
        assert!(matches!(query.filter(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_malformed_transaction_id_is_bad_request() {
        let query = InteractionListQuery {
            transaction_id: Some("not-a-uuid".to_string()),
            ..Default::default()
        };
        assert!(matches!(query.filter(), Err(AppError::BadRequest(_))));
    }
}
