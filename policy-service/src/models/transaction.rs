use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

const INTERACTION_SUFFIX: &str = "-authentication";

/// Authentication method behind an interaction type:
/// `password-authentication` -> `password`.
pub fn method_of(interaction_type: &str) -> &str {
    interaction_type
        .strip_suffix(INTERACTION_SUFFIX)
        .unwrap_or(interaction_type)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failure,
    Locked,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failure => "FAILURE",
            TransactionStatus::Locked => "LOCKED",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Some(TransactionStatus::Pending),
            "SUCCESS" => Some(TransactionStatus::Success),
            "FAILURE" => Some(TransactionStatus::Failure),
            "LOCKED" => Some(TransactionStatus::Locked),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionOutcome {
    Success,
    Failure,
}

/// What the authorization request asked for; drives policy selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub client_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub acr_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub transaction_id: Uuid,
    #[serde(rename = "type")]
    pub interaction_type: String,
    pub call_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub payload: Value,
    pub updated_at: DateTime<Utc>,
}

impl InteractionRecord {
    fn new(transaction_id: Uuid, interaction_type: &str, now: DateTime<Utc>) -> Self {
        Self {
            transaction_id,
            interaction_type: interaction_type.to_string(),
            call_count: 0,
            success_count: 0,
            failure_count: 0,
            payload: Value::Null,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticationTransaction {
    pub transaction_id: Uuid,
    pub tenant_id: Uuid,
    pub flow: String,
    pub request: RequestContext,
    pub last_interaction_type: Option<String>,
    pub status: TransactionStatus,
    pub user_id: Option<String>,
    pub interactions: BTreeMap<String, InteractionRecord>,
    pub acr: Option<String>,
    pub amr: Vec<String>,
    pub denied_scopes: Vec<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthenticationTransaction {
    pub fn new(
        tenant_id: Uuid,
        flow: impl Into<String>,
        request: RequestContext,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            tenant_id,
            flow: flow.into(),
            request,
            last_interaction_type: None,
            status: TransactionStatus::Pending,
            user_id: None,
            interactions: BTreeMap::new(),
            acr: None,
            amr: Vec::new(),
            denied_scopes: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Bumps the counters for one attempt. Status is decided by the engine.
    pub fn record(
        &mut self,
        interaction_type: &str,
        outcome: InteractionOutcome,
        user_id: Option<String>,
        payload: Option<Value>,
        now: DateTime<Utc>,
    ) {
        let transaction_id = self.transaction_id;
        let record = self
            .interactions
            .entry(interaction_type.to_string())
            .or_insert_with(|| InteractionRecord::new(transaction_id, interaction_type, now));

        record.call_count += 1;
        match outcome {
            InteractionOutcome::Success => record.success_count += 1,
            InteractionOutcome::Failure => record.failure_count += 1,
        }
        if let Some(payload) = payload {
            record.payload = payload;
        }
        record.updated_at = now;

        if self.user_id.is_none() {
            self.user_id = user_id;
        }
        self.last_interaction_type = Some(interaction_type.to_string());
        self.updated_at = now;
    }

    /// Methods with at least one successful interaction.
    pub fn satisfied_methods(&self) -> BTreeSet<String> {
        self.interactions
            .values()
            .filter(|r| r.success_count > 0)
            .map(|r| method_of(&r.interaction_type).to_string())
            .collect()
    }

    pub fn has_any_success(&self) -> bool {
        self.interactions.values().any(|r| r.success_count > 0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub user_id: Option<String>,
    pub client_id: Option<String>,
    pub flow: Option<String>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &AuthenticationTransaction) -> bool {
        self.status.map_or(true, |s| tx.status == s)
            && self
                .user_id
                .as_deref()
                .map_or(true, |u| tx.user_id.as_deref() == Some(u))
            && self
                .client_id
                .as_deref()
                .map_or(true, |c| tx.request.client_id == c)
            && self.flow.as_deref().map_or(true, |f| tx.flow == f)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InteractionFilter {
    pub transaction_id: Option<Uuid>,
    pub interaction_type: Option<String>,
}

impl InteractionFilter {
    pub fn matches(&self, record: &InteractionRecord) -> bool {
        self.transaction_id
            .map_or(true, |id| record.transaction_id == id)
            && self
                .interaction_type
                .as_deref()
                .map_or(true, |t| record.interaction_type == t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transaction() -> AuthenticationTransaction {
        AuthenticationTransaction::new(
            Uuid::new_v4(),
            "oauth",
            RequestContext {
                client_id: "web-app".to_string(),
                scopes: vec!["openid".to_string()],
                acr_values: vec![],
            },
            Duration::seconds(600),
            Utc::now(),
        )
    }

    #[test]
    fn test_method_of_strips_suffix() {
        assert_eq!(method_of("password-authentication"), "password");
        assert_eq!(method_of("fido2-authentication"), "fido2");
        assert_eq!(method_of("sms"), "sms");
    }

    #[test]
    fn test_record_increments_counters() {
        let mut tx = transaction();
        let now = Utc::now();
        tx.record(
            "password-authentication",
            InteractionOutcome::Failure,
            None,
            None,
            now,
        );
        tx.record(
            "password-authentication",
            InteractionOutcome::Success,
            Some("user-1".to_string()),
            Some(json!({ "username": "alice" })),
            now,
        );

        let record = &tx.interactions["password-authentication"];
        assert_eq!(record.call_count, 2);
        assert_eq!(record.success_count, 1);
        assert_eq!(record.failure_count, 1);
        assert_eq!(record.payload, json!({ "username": "alice" }));
        assert_eq!(tx.user_id.as_deref(), Some("user-1"));
        assert_eq!(
            tx.last_interaction_type.as_deref(),
            Some("password-authentication")
        );
    }

    #[test]
    fn test_satisfied_methods_only_counts_successes() {
        let mut tx = transaction();
        let now = Utc::now();
        tx.record("sms-authentication", InteractionOutcome::Failure, None, None, now);
        tx.record("password-authentication", InteractionOutcome::Success, None, None, now);

        let methods = tx.satisfied_methods();
        assert!(methods.contains("password"));
        assert!(!methods.contains("sms"));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            TransactionStatus::from_string("success"),
            Some(TransactionStatus::Success)
        );
        assert_eq!(TransactionStatus::from_string("unknown"), None);
        assert!(TransactionStatus::Locked.is_terminal());
        assert!(!TransactionStatus::Pending.is_terminal());
    }

    #[test]
    fn test_filter_matches() {
        let mut tx = transaction();
        tx.user_id = Some("user-1".to_string());

        let filter = TransactionFilter {
            status: Some(TransactionStatus::Pending),
            user_id: Some("user-1".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&tx));

        let other = TransactionFilter {
            client_id: Some("mobile".to_string()),
            ..Default::default()
        };
        assert!(!other.matches(&tx));
    }
}
