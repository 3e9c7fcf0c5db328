use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use serde_json::Value;
use service_core::utils::Page;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

use super::acr::AcrResolver;
use super::condition::{evaluate, EvaluationContext};
use super::error::ServiceError;
use super::metrics;
use super::selector::select;
use super::store::{PolicyConfigStore, StoreError, TransactionStore};
use crate::models::{
    method_of, AuthenticationPolicy, AuthenticationPolicyConfig, AuthenticationTransaction,
    ConditionNode, InteractionFilter, InteractionOutcome, InteractionRecord, RequestContext,
    TransactionFilter, TransactionStatus,
};

const MAX_SAVE_ATTEMPTS: usize = 3;

/// One authentication-method attempt reported by the authorization server.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub outcome: InteractionOutcome,
    pub user_id: Option<String>,
    pub payload: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct StartedTransaction {
    pub transaction: AuthenticationTransaction,
    pub available_methods: Vec<String>,
}

/// Drives authentication transactions from PENDING to a terminal status.
pub struct TransactionEngine {
    configs: Arc<dyn PolicyConfigStore>,
    transactions: Arc<dyn TransactionStore>,
    acr: AcrResolver,
    ttl: Duration,
    locks: DashMap<(Uuid, Uuid), Arc<Mutex<()>>>,
}

impl TransactionEngine {
    pub fn new(
        configs: Arc<dyn PolicyConfigStore>,
        transactions: Arc<dyn TransactionStore>,
        acr: AcrResolver,
        ttl: Duration,
    ) -> Self {
        Self {
            configs,
            transactions,
            acr,
            ttl,
            locks: DashMap::new(),
        }
    }

    #[instrument(skip(self, request), fields(client_id = %request.client_id))]
    pub async fn begin(
        &self,
        tenant_id: Uuid,
        flow: &str,
        request: RequestContext,
    ) -> Result<StartedTransaction, ServiceError> {
        let config = self.active_config(tenant_id, flow).await?;
        let policy = select(&config, &request)?;
        let available_methods = policy.available_methods.clone();

        let tx = AuthenticationTransaction::new(tenant_id, flow, request, self.ttl, Utc::now());
        self.transactions.insert(&tx).await?;

        metrics::record_transition(tx.status.as_str());
        tracing::info!(
            tenant_id = %tenant_id,
            transaction_id = %tx.transaction_id,
            flow = %flow,
            "Authentication transaction started"
        );

        Ok(StartedTransaction {
            transaction: tx,
            available_methods,
        })
    }

    /// Attempts on one transaction are serialized in-process; the store's
    /// version check covers writers in other processes.
    #[instrument(skip(self, attempt), fields(outcome = ?attempt.outcome))]
    pub async fn record_attempt(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
        interaction_type: &str,
        attempt: Attempt,
    ) -> Result<AuthenticationTransaction, ServiceError> {
        if interaction_type.trim().is_empty() {
            return Err(ServiceError::Validation(
                "Interaction type is required".to_string(),
            ));
        }

        let key = (tenant_id, transaction_id);
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.apply_attempt(tenant_id, transaction_id, interaction_type, &attempt)
                .await
        };

        drop(lock);
        self.locks.remove_if(&key, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn apply_attempt(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
        interaction_type: &str,
        attempt: &Attempt,
    ) -> Result<AuthenticationTransaction, ServiceError> {
        for retry in 0..MAX_SAVE_ATTEMPTS {
            let now = Utc::now();
            let mut tx = self
                .transactions
                .find(tenant_id, transaction_id, now)
                .await?
                .ok_or_else(|| transaction_not_found(transaction_id))?;

            if tx.status.is_terminal() {
                return Err(ServiceError::TransactionCompleted(transaction_id));
            }

            let config = self.active_config(tenant_id, &tx.flow).await?;
            let policy = select(&config, &tx.request)?;

            let method = method_of(interaction_type);
            if !policy.permits_method(method) {
                return Err(ServiceError::Validation(format!(
                    "Authentication method '{}' is not available for this transaction",
                    method
                )));
            }

            let expected_version = tx.version;
            tx.record(
                interaction_type,
                attempt.outcome,
                attempt.user_id.clone(),
                attempt.payload.clone(),
                now,
            );
            self.evaluate(&mut tx, policy)?;
            tx.version = expected_version + 1;

            match self.transactions.save(&tx, expected_version).await {
                Ok(()) => {
                    metrics::record_evaluation(&tx.status.as_str().to_ascii_lowercase());
                    if tx.status.is_terminal() {
                        metrics::record_transition(tx.status.as_str());
                        tracing::info!(
                            tenant_id = %tenant_id,
                            transaction_id = %transaction_id,
                            status = tx.status.as_str(),
                            acr = ?tx.acr,
                            "Authentication transaction completed"
                        );
                    }
                    return Ok(tx);
                }
                Err(StoreError::VersionConflict(_)) => {
                    tracing::warn!(
                        transaction_id = %transaction_id,
                        retry,
                        "Transaction version conflict; reloading"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::Conflict(format!(
            "Authentication transaction {} was modified concurrently",
            transaction_id
        )))
    }

    /// Success first, then lock, then failure. ACR failure aborts the attempt.
    fn evaluate(
        &self,
        tx: &mut AuthenticationTransaction,
        policy: &AuthenticationPolicy,
    ) -> Result<(), ServiceError> {
        let ctx = EvaluationContext::for_transaction(tx);
        let fires = |tree: &Option<ConditionNode>| {
            tree.as_ref()
                .is_some_and(|t| !t.is_empty() && evaluate(t, &ctx))
        };

        let succeeded = match &policy.success_conditions {
            Some(tree) if !tree.is_empty() => evaluate(tree, &ctx),
            _ => tx.has_any_success(),
        };

        let status = if succeeded {
            TransactionStatus::Success
        } else if fires(&policy.lock_conditions) {
            TransactionStatus::Locked
        } else if fires(&policy.failure_conditions) {
            TransactionStatus::Failure
        } else {
            TransactionStatus::Pending
        };

        if status == TransactionStatus::Success {
            let satisfied = tx.satisfied_methods();
            tx.acr = self.acr.resolve(policy, &satisfied)?;
            tx.denied_scopes = self.acr.denied_scopes(policy, &satisfied);
            tx.amr = satisfied.into_iter().collect();
        }
        tx.status = status;
        Ok(())
    }

    async fn active_config(
        &self,
        tenant_id: Uuid,
        flow: &str,
    ) -> Result<Arc<AuthenticationPolicyConfig>, ServiceError> {
        self.configs
            .find_by_flow(tenant_id, flow)
            .await?
            .ok_or_else(|| {
                ServiceError::Configuration(format!(
                    "No authentication policy config exists for flow '{}'",
                    flow
                ))
            })
    }

    #[instrument(skip(self))]
    pub async fn get(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<AuthenticationTransaction, ServiceError> {
        self.transactions
            .find(tenant_id, transaction_id, Utc::now())
            .await?
            .ok_or_else(|| transaction_not_found(transaction_id))
    }

    #[instrument(skip(self))]
    pub async fn get_interaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
        interaction_type: &str,
    ) -> Result<InteractionRecord, ServiceError> {
        self.transactions
            .find_interaction(tenant_id, transaction_id, interaction_type, Utc::now())
            .await?
            .ok_or_else(|| {
                tracing::debug!(transaction_id = %transaction_id, "Interaction not found");
                ServiceError::NotFound(format!(
                    "No '{}' interaction recorded for transaction {}",
                    interaction_type, transaction_id
                ))
            })
    }

    #[instrument(skip(self, filter))]
    pub async fn list(
        &self,
        tenant_id: Uuid,
        filter: &TransactionFilter,
        page: Page,
    ) -> Result<(Vec<AuthenticationTransaction>, i64), ServiceError> {
        Ok(self
            .transactions
            .list(tenant_id, filter, page, Utc::now())
            .await?)
    }

    #[instrument(skip(self, filter))]
    pub async fn list_interactions(
        &self,
        tenant_id: Uuid,
        filter: &InteractionFilter,
        page: Page,
    ) -> Result<(Vec<InteractionRecord>, i64), ServiceError> {
        Ok(self
            .transactions
            .list_interactions(tenant_id, filter, page, Utc::now())
            .await?)
    }

    pub async fn purge_expired(&self) -> Result<u64, ServiceError> {
        let purged = self.transactions.purge_expired(Utc::now()).await?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired authentication transactions");
        }
        Ok(purged)
    }
}

fn transaction_not_found(transaction_id: Uuid) -> ServiceError {
    tracing::debug!(transaction_id = %transaction_id, "Authentication transaction not found");
    ServiceError::NotFound(format!(
        "Authentication transaction {} not found",
        transaction_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::{InMemoryPolicyConfigStore, InMemoryTransactionStore};
    use serde_json::json;

    struct Fixture {
        engine: TransactionEngine,
        configs: Arc<InMemoryPolicyConfigStore>,
        tenant: Uuid,
    }

    fn fixture_with_ttl(ttl: Duration) -> Fixture {
        let configs = Arc::new(InMemoryPolicyConfigStore::new());
        let engine = TransactionEngine::new(
            configs.clone(),
            Arc::new(InMemoryTransactionStore::new()),
            AcrResolver::new(
                vec![
                    "urn:mace:incommon:iap:gold".to_string(),
                    "urn:mace:incommon:iap:silver".to_string(),
                ],
                None,
            ),
            ttl,
        );
        Fixture {
            engine,
            configs,
            tenant: Uuid::new_v4(),
        }
    }

    fn fixture() -> Fixture {
        fixture_with_ttl(Duration::seconds(600))
    }

    fn password_config() -> AuthenticationPolicyConfig {
        serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "flow": "oauth",
            "enabled": true,
            "policies": [{
                "priority": 1,
                "available_methods": ["password", "fido2"],
                "success_conditions": {
                    "any_of": [[{
                        "path": "password-authentication.success_count",
                        "type": "integer",
                        "operation": "gte",
                        "value": 1
                    }]]
                },
                "failure_conditions": {
                    "any_of": [[{
                        "path": "password-authentication.failure_count",
                        "type": "integer",
                        "operation": "gte",
                        "value": 3
                    }]]
                },
                "lock_conditions": {
                    "any_of": [[{
                        "path": "password-authentication.failure_count",
                        "type": "integer",
                        "operation": "gte",
                        "value": 2
                    }]]
                },
                "acr_mapping_rules": {
                    "urn:mace:incommon:iap:silver": ["password"],
                    "urn:mace:incommon:iap:gold": ["password", "fido2"]
                },
                "level_of_authentication_scopes": {
                    "urn:mace:incommon:iap:gold": ["transfers"]
                }
            }]
        }))
        .unwrap()
    }

    fn request() -> RequestContext {
        RequestContext {
            client_id: "web-app".to_string(),
            scopes: vec!["openid".to_string(), "transfers".to_string()],
            acr_values: vec![],
        }
    }

    fn attempt(outcome: InteractionOutcome) -> Attempt {
        Attempt {
            outcome,
            user_id: Some("user-1".to_string()),
            payload: None,
        }
    }

    async fn started(f: &Fixture, config: AuthenticationPolicyConfig) -> Uuid {
        f.configs.insert(f.tenant, &config).await.unwrap();
        f.engine
            .begin(f.tenant, &config.flow, request())
            .await
            .unwrap()
            .transaction
            .transaction_id
    }

    #[tokio::test]
    async fn test_password_success_reaches_success_and_stays() {
        let f = fixture();
        let id = started(&f, password_config()).await;

        let tx = f
            .engine
            .record_attempt(
                f.tenant,
                id,
                "password-authentication",
                attempt(InteractionOutcome::Success),
            )
            .await
            .unwrap();

        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.acr.as_deref(), Some("urn:mace:incommon:iap:silver"));
        assert_eq!(tx.amr, vec!["password".to_string()]);
        assert_eq!(tx.denied_scopes, vec!["transfers".to_string()]);

        let again = f
            .engine
            .record_attempt(
                f.tenant,
                id,
                "password-authentication",
                attempt(InteractionOutcome::Success),
            )
            .await;
        assert!(matches!(again, Err(ServiceError::TransactionCompleted(_))));

        let stored = f.engine.get(f.tenant, id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_lock_takes_precedence_over_failure() {
        let f = fixture();
        let id = started(&f, password_config()).await;

        let first = f
            .engine
            .record_attempt(
                f.tenant,
                id,
                "password-authentication",
                attempt(InteractionOutcome::Failure),
            )
            .await
            .unwrap();
        assert_eq!(first.status, TransactionStatus::Pending);

        let second = f
            .engine
            .record_attempt(
                f.tenant,
                id,
                "password-authentication",
                attempt(InteractionOutcome::Failure),
            )
            .await
            .unwrap();
        assert_eq!(second.status, TransactionStatus::Locked);
        assert!(second.acr.is_none());
    }

    #[tokio::test]
    async fn test_failure_conditions_produce_failure() {
        let f = fixture();
        let mut config = password_config();
        config.policies[0].lock_conditions = None;
        let id = started(&f, config).await;

        let mut last = None;
        for _ in 0..3 {
            last = Some(
                f.engine
                    .record_attempt(
                        f.tenant,
                        id,
                        "password-authentication",
                        attempt(InteractionOutcome::Failure),
                    )
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(last.unwrap().status, TransactionStatus::Failure);
    }

    #[tokio::test]
    async fn test_unavailable_method_rejected() {
        let f = fixture();
        let id = started(&f, password_config()).await;

        let result = f
            .engine
            .record_attempt(
                f.tenant,
                id,
                "sms-authentication",
                attempt(InteractionOutcome::Success),
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));

        let tx = f.engine.get(f.tenant, id).await.unwrap();
        assert!(tx.interactions.is_empty());
    }

    #[tokio::test]
    async fn test_missing_success_conditions_fall_back_to_any_success() {
        let f = fixture();
        let mut config = password_config();
        config.policies[0].success_conditions = None;
        config.policies[0].acr_mapping_rules.clear();
        config.policies[0].level_of_authentication_scopes.clear();
        let id = started(&f, config).await;

        let tx = f
            .engine
            .record_attempt(
                f.tenant,
                id,
                "fido2-authentication",
                attempt(InteractionOutcome::Success),
            )
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
        assert!(tx.acr.is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_acr_persists_nothing() {
        let f = fixture();
        let mut config = password_config();
        config.policies[0].acr_mapping_rules.clear();
        config.policies[0]
            .acr_mapping_rules
            .insert("urn:mace:incommon:iap:gold".to_string(), vec!["fido2".to_string()]);
        let id = started(&f, config).await;

        let result = f
            .engine
            .record_attempt(
                f.tenant,
                id,
                "password-authentication",
                attempt(InteractionOutcome::Success),
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Configuration(_))));

        let tx = f.engine.get(f.tenant, id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.version, 0);
        assert!(tx.interactions.is_empty());
    }

    #[tokio::test]
    async fn test_expired_transaction_is_not_found() {
        let f = fixture_with_ttl(Duration::zero());
        let id = started(&f, password_config()).await;

        assert!(matches!(
            f.engine.get(f.tenant, id).await,
            Err(ServiceError::NotFound(_))
        ));
        let result = f
            .engine
            .record_attempt(
                f.tenant,
                id,
                "password-authentication",
                attempt(InteractionOutcome::Success),
            )
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
        assert_eq!(f.engine.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_begin_without_config_is_configuration_error() {
        let f = fixture();
        let result = f.engine.begin(f.tenant, "oauth", request()).await;
        assert!(matches!(result, Err(ServiceError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_concurrent_attempts_are_all_counted() {
        let f = Arc::new(fixture());
        let mut config = password_config();
        config.policies[0].lock_conditions = None;
        config.policies[0].failure_conditions = None;
        let id = started(&f, config).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                f.engine
                    .record_attempt(
                        f.tenant,
                        id,
                        "password-authentication",
                        attempt(InteractionOutcome::Failure),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = f
            .engine
            .get_interaction(f.tenant, id, "password-authentication")
            .await
            .unwrap();
        assert_eq!(record.failure_count, 10);
        assert!(f.engine.locks.is_empty());
    }
}
