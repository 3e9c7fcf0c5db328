use std::collections::HashSet;
use std::sync::Arc;

use service_core::utils::{EnabledFilter, Page};
use tracing::instrument;
use uuid::Uuid;

use super::dry_run::ExecutionMode;
use super::error::ServiceError;
use super::metrics;
use super::store::PolicyConfigStore;
use crate::dtos::PolicyConfigRequest;
use crate::models::{AuthenticationPolicy, AuthenticationPolicyConfig};

/// Create, replace, delete and read tenant policy configs. Every mutation
/// takes an `ExecutionMode`; validation and conflict checks run in both.
#[derive(Clone)]
pub struct PolicyConfigService {
    store: Arc<dyn PolicyConfigStore>,
}

impl PolicyConfigService {
    pub fn new(store: Arc<dyn PolicyConfigStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, request), fields(flow = %request.flow, dry_run = mode.is_dry_run()))]
    pub async fn create(
        &self,
        tenant_id: Uuid,
        request: PolicyConfigRequest,
        mode: ExecutionMode,
    ) -> Result<AuthenticationPolicyConfig, ServiceError> {
        let id = request.id.unwrap_or_else(Uuid::new_v4);
        let config = request.into_config(id);
        validate_config(&config)?;

        if self.store.find(tenant_id, config.id).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Authentication policy config {} already exists",
                config.id
            )));
        }
        if self.store.find_by_flow(tenant_id, &config.flow).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "An authentication policy config for flow '{}' already exists",
                config.flow
            )));
        }

        mode.run(|| self.store.insert(tenant_id, &config)).await?;

        metrics::record_mutation("create", mode.is_dry_run());
        tracing::info!(
            tenant_id = %tenant_id,
            config_id = %config.id,
            dry_run = mode.is_dry_run(),
            "Authentication policy config created"
        );
        Ok(config)
    }

    #[instrument(skip(self, request), fields(dry_run = mode.is_dry_run()))]
    pub async fn update(
        &self,
        tenant_id: Uuid,
        config_id: Uuid,
        request: PolicyConfigRequest,
        mode: ExecutionMode,
    ) -> Result<AuthenticationPolicyConfig, ServiceError> {
        if let Some(body_id) = request.id {
            if body_id != config_id {
                return Err(ServiceError::Validation(format!(
                    "Body id {} does not match path id {}",
                    body_id, config_id
                )));
            }
        }

        let config = request.into_config(config_id);
        validate_config(&config)?;

        let existing = self
            .store
            .find(tenant_id, config_id)
            .await?
            .ok_or_else(|| not_found(config_id))?;

        if let Some(other) = self.store.find_by_flow(tenant_id, &config.flow).await? {
            if other.id != config_id {
                return Err(ServiceError::Conflict(format!(
                    "An authentication policy config for flow '{}' already exists",
                    config.flow
                )));
            }
        }

        if *existing == config {
            tracing::debug!(config_id = %config_id, "Update is a no-op");
            return Ok(config);
        }

        if let Some(false) = mode.run(|| self.store.replace(tenant_id, &config)).await? {
            return Err(not_found(config_id));
        }

        metrics::record_mutation("update", mode.is_dry_run());
        tracing::info!(
            tenant_id = %tenant_id,
            config_id = %config_id,
            dry_run = mode.is_dry_run(),
            "Authentication policy config updated"
        );
        Ok(config)
    }

    #[instrument(skip(self), fields(dry_run = mode.is_dry_run()))]
    pub async fn delete(
        &self,
        tenant_id: Uuid,
        config_id: Uuid,
        mode: ExecutionMode,
    ) -> Result<(), ServiceError> {
        if self.store.find(tenant_id, config_id).await?.is_none() {
            return Err(not_found(config_id));
        }

        if let Some(false) = mode.run(|| self.store.delete(tenant_id, config_id)).await? {
            return Err(not_found(config_id));
        }

        metrics::record_mutation("delete", mode.is_dry_run());
        tracing::info!(
            tenant_id = %tenant_id,
            config_id = %config_id,
            dry_run = mode.is_dry_run(),
            "Authentication policy config deleted"
        );
        Ok(())
    }

    /// Disabled configs are returned as-is, marked `enabled: false`.
    #[instrument(skip(self))]
    pub async fn get(
        &self,
        tenant_id: Uuid,
        config_id: Uuid,
    ) -> Result<Arc<AuthenticationPolicyConfig>, ServiceError> {
        self.store
            .find(tenant_id, config_id)
            .await?
            .ok_or_else(|| not_found(config_id))
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        tenant_id: Uuid,
        filter: EnabledFilter,
        page: Page,
    ) -> Result<(Vec<AuthenticationPolicyConfig>, i64), ServiceError> {
        let (configs, total) = self.store.list(tenant_id, filter, page).await?;
        let configs = configs.iter().map(|c| c.as_ref().clone()).collect();
        Ok((configs, total))
    }
}

fn not_found(config_id: Uuid) -> ServiceError {
    tracing::debug!(config_id = %config_id, "Authentication policy config not found");
    ServiceError::NotFound(format!(
        "Authentication policy config {} not found",
        config_id
    ))
}

/// Structural rules a config must meet before any store is touched.
pub fn validate_config(config: &AuthenticationPolicyConfig) -> Result<(), ServiceError> {
    if config.flow.trim().is_empty() {
        return Err(ServiceError::Validation("flow is required".to_string()));
    }
    if config.policies.is_empty() {
        return Err(ServiceError::Validation(
            "At least one policy is required".to_string(),
        ));
    }

    let mut priorities = HashSet::new();
    for (index, policy) in config.policies.iter().enumerate() {
        if !priorities.insert(policy.priority) {
            return Err(ServiceError::Validation(format!(
                "Duplicate policy priority {}",
                policy.priority
            )));
        }
        validate_policy(index, policy)?;
    }
    Ok(())
}

fn validate_policy(index: usize, policy: &AuthenticationPolicy) -> Result<(), ServiceError> {
    let mut methods = HashSet::new();
    for method in &policy.available_methods {
        if method.trim().is_empty() {
            return Err(ServiceError::Validation(format!(
                "policies[{}].available_methods must not contain empty values",
                index
            )));
        }
        if !methods.insert(method.as_str()) {
            return Err(ServiceError::Validation(format!(
                "policies[{}].available_methods lists '{}' more than once",
                index, method
            )));
        }
    }

    let trees = [
        ("success_conditions", &policy.success_conditions),
        ("failure_conditions", &policy.failure_conditions),
        ("lock_conditions", &policy.lock_conditions),
    ];
    for (name, tree) in trees {
        if let Some(tree) = tree {
            tree.check(&format!("policies[{}].{}", index, name))
                .map_err(ServiceError::Validation)?;
        }
    }

    for (acr, required) in &policy.acr_mapping_rules {
        if acr.trim().is_empty() {
            return Err(ServiceError::Validation(format!(
                "policies[{}].acr_mapping_rules has an empty ACR value",
                index
            )));
        }
        if required.is_empty() {
            return Err(ServiceError::Validation(format!(
                "policies[{}].acr_mapping_rules.{} requires no methods",
                index, acr
            )));
        }
        if let Some(method) = required.iter().find(|m| !policy.permits_method(m)) {
            return Err(ServiceError::Validation(format!(
                "policies[{}].acr_mapping_rules.{} references '{}' outside available_methods",
                index, acr, method
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::InMemoryPolicyConfigStore;
    use serde_json::json;

    fn service() -> PolicyConfigService {
        PolicyConfigService::new(Arc::new(InMemoryPolicyConfigStore::new()))
    }

    fn request(flow: &str) -> PolicyConfigRequest {
        serde_json::from_value(json!({
            "flow": flow,
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
                "acr_mapping_rules": {
                    "urn:mace:incommon:iap:silver": ["password"]
                }
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_generates_id_and_persists() {
        let service = service();
        let tenant = Uuid::new_v4();

        let created = service
            .create(tenant, request("oauth"), ExecutionMode::Commit)
            .await
            .unwrap();

        let stored = service.get(tenant, created.id).await.unwrap();
        assert_eq!(*stored, created);
        assert!(stored.enabled);
    }

    #[tokio::test]
    async fn test_dry_run_create_persists_nothing() {
        let service = service();
        let tenant = Uuid::new_v4();

        let preview = service
            .create(tenant, request("oauth"), ExecutionMode::DryRun)
            .await
            .unwrap();

        assert!(matches!(
            service.get(tenant, preview.id).await,
            Err(ServiceError::NotFound(_))
        ));
        let (list, total) = service
            .list(tenant, EnabledFilter::All, Page::new(20, 0))
            .await
            .unwrap();
        assert!(list.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_duplicate_flow_conflicts_in_both_modes() {
        let service = service();
        let tenant = Uuid::new_v4();
        service
            .create(tenant, request("oauth"), ExecutionMode::Commit)
            .await
            .unwrap();

        for mode in [ExecutionMode::Commit, ExecutionMode::DryRun] {
            let result = service.create(tenant, request("oauth"), mode).await;
            assert!(matches!(result, Err(ServiceError::Conflict(_))));
        }
    }

    #[tokio::test]
    async fn test_update_rejects_mismatched_body_id() {
        let service = service();
        let tenant = Uuid::new_v4();
        let created = service
            .create(tenant, request("oauth"), ExecutionMode::Commit)
            .await
            .unwrap();

        let mut body = request("oauth");
        body.id = Some(Uuid::new_v4());
        let result = service
            .update(tenant, created.id, body, ExecutionMode::Commit)
            .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_dry_run_update_leaves_stored_config() {
        let service = service();
        let tenant = Uuid::new_v4();
        let created = service
            .create(tenant, request("oauth"), ExecutionMode::Commit)
            .await
            .unwrap();

        let mut body = request("oauth");
        body.enabled = Some(false);
        let preview = service
            .update(tenant, created.id, body, ExecutionMode::DryRun)
            .await
            .unwrap();
        assert!(!preview.enabled);

        let stored = service.get(tenant, created.id).await.unwrap();
        assert!(stored.enabled);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found_in_both_modes() {
        let service = service();
        let tenant = Uuid::new_v4();

        for mode in [ExecutionMode::Commit, ExecutionMode::DryRun] {
            let result = service.delete(tenant, Uuid::new_v4(), mode).await;
            assert!(matches!(result, Err(ServiceError::NotFound(_))));
        }
    }

    #[tokio::test]
    async fn test_disabled_configs_hidden_from_default_list() {
        let service = service();
        let tenant = Uuid::new_v4();
        let mut body = request("oauth");
        body.enabled = Some(false);
        service
            .create(tenant, body, ExecutionMode::Commit)
            .await
            .unwrap();
        service
            .create(tenant, request("hybrid"), ExecutionMode::Commit)
            .await
            .unwrap();

        let (list, total) = service
            .list(tenant, EnabledFilter::EnabledOnly, Page::new(20, 0))
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(list[0].flow, "hybrid");

        let (_, total) = service
            .list(tenant, EnabledFilter::All, Page::new(20, 0))
            .await
            .unwrap();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_duplicate_priorities_rejected() {
        let mut config = request("oauth").into_config(Uuid::new_v4());
        let copy = config.policies[0].clone();
        config.policies.push(copy);

        assert!(matches!(
            validate_config(&config),
            Err(ServiceError::Validation(msg)) if msg.contains("priority")
        ));
    }

    #[test]
    fn test_acr_rule_outside_available_methods_rejected() {
        let mut config = request("oauth").into_config(Uuid::new_v4());
        config.policies[0]
            .acr_mapping_rules
            .insert("gold".to_string(), vec!["sms".to_string()]);

        assert!(matches!(
            validate_config(&config),
            Err(ServiceError::Validation(msg)) if msg.contains("sms")
        ));
    }

    #[test]
    fn test_blank_flow_rejected() {
        let config = request("  ").into_config(Uuid::new_v4());
        assert!(validate_config(&config).is_err());
    }
}
