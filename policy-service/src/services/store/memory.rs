use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use service_core::utils::{EnabledFilter, Page};
use uuid::Uuid;

use super::{OrganizationDirectory, PolicyConfigStore, StoreError, TransactionStore};
use crate::models::{
    AuthenticationPolicyConfig, AuthenticationTransaction, InteractionFilter, InteractionRecord,
    TransactionFilter,
};

#[derive(Debug, Clone)]
struct StoredConfig {
    config: Arc<AuthenticationPolicyConfig>,
    created_at: DateTime<Utc>,
}

/// Per-tenant maps; the tenant's shard lock makes check-and-insert atomic.
#[derive(Debug, Default)]
pub struct InMemoryPolicyConfigStore {
    tenants: DashMap<Uuid, BTreeMap<Uuid, StoredConfig>>,
}

impl InMemoryPolicyConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn flow_taken(configs: &BTreeMap<Uuid, StoredConfig>, flow: &str, except: Uuid) -> bool {
    configs
        .values()
        .any(|stored| stored.config.flow == flow && stored.config.id != except)
}

#[async_trait]
impl PolicyConfigStore for InMemoryPolicyConfigStore {
    async fn insert(
        &self,
        tenant_id: Uuid,
        config: &AuthenticationPolicyConfig,
    ) -> Result<(), StoreError> {
        let mut configs = self.tenants.entry(tenant_id).or_default();
        if configs.contains_key(&config.id) {
            return Err(StoreError::Duplicate(format!("config id {}", config.id)));
        }
        if flow_taken(&configs, &config.flow, config.id) {
            return Err(StoreError::Duplicate(format!("flow '{}'", config.flow)));
        }
        configs.insert(
            config.id,
            StoredConfig {
                config: Arc::new(config.clone()),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn replace(
        &self,
        tenant_id: Uuid,
        config: &AuthenticationPolicyConfig,
    ) -> Result<bool, StoreError> {
        let Some(mut configs) = self.tenants.get_mut(&tenant_id) else {
            return Ok(false);
        };
        if !configs.contains_key(&config.id) {
            return Ok(false);
        }
        if flow_taken(&configs, &config.flow, config.id) {
            return Err(StoreError::Duplicate(format!("flow '{}'", config.flow)));
        }
        if let Some(stored) = configs.get_mut(&config.id) {
            stored.config = Arc::new(config.clone());
        }
        Ok(true)
    }

    async fn delete(&self, tenant_id: Uuid, config_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .tenants
            .get_mut(&tenant_id)
            .map(|mut configs| configs.remove(&config_id).is_some())
            .unwrap_or(false))
    }

    async fn find(
        &self,
        tenant_id: Uuid,
        config_id: Uuid,
    ) -> Result<Option<Arc<AuthenticationPolicyConfig>>, StoreError> {
        Ok(self
            .tenants
            .get(&tenant_id)
            .and_then(|configs| configs.get(&config_id).map(|s| s.config.clone())))
    }

    async fn find_by_flow(
        &self,
        tenant_id: Uuid,
        flow: &str,
    ) -> Result<Option<Arc<AuthenticationPolicyConfig>>, StoreError> {
        Ok(self.tenants.get(&tenant_id).and_then(|configs| {
            configs
                .values()
                .find(|s| s.config.flow == flow)
                .map(|s| s.config.clone())
        }))
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        filter: EnabledFilter,
        page: Page,
    ) -> Result<(Vec<Arc<AuthenticationPolicyConfig>>, i64), StoreError> {
        let mut visible: Vec<StoredConfig> = self
            .tenants
            .get(&tenant_id)
            .map(|configs| {
                configs
                    .values()
                    .filter(|s| filter.admits_item(s.config.as_ref()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        visible.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.config.id.cmp(&b.config.id))
        });

        let total = visible.len() as i64;
        let list = page
            .slice(&visible)
            .into_iter()
            .map(|s| s.config)
            .collect();
        Ok((list, total))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTransactionStore {
    transactions: DashMap<(Uuid, Uuid), AuthenticationTransaction>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, tenant_id: Uuid, now: DateTime<Utc>) -> Vec<AuthenticationTransaction> {
        self.transactions
            .iter()
            .filter(|entry| entry.key().0 == tenant_id && !entry.value().is_expired(now))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: &AuthenticationTransaction) -> Result<(), StoreError> {
        let key = (tx.tenant_id, tx.transaction_id);
        if self.transactions.contains_key(&key) {
            return Err(StoreError::Duplicate(format!(
                "transaction {}",
                tx.transaction_id
            )));
        }
        self.transactions.insert(key, tx.clone());
        Ok(())
    }

    async fn find(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthenticationTransaction>, StoreError> {
        Ok(self
            .transactions
            .get(&(tenant_id, transaction_id))
            .filter(|tx| !tx.is_expired(now))
            .map(|tx| tx.value().clone()))
    }

    async fn save(
        &self,
        tx: &AuthenticationTransaction,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let mut stored = self
            .transactions
            .get_mut(&(tx.tenant_id, tx.transaction_id))
            .ok_or(StoreError::VersionConflict(tx.transaction_id))?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict(tx.transaction_id));
        }
        *stored = tx.clone();
        Ok(())
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        filter: &TransactionFilter,
        page: Page,
        now: DateTime<Utc>,
    ) -> Result<(Vec<AuthenticationTransaction>, i64), StoreError> {
        let mut matching: Vec<AuthenticationTransaction> = self
            .live(tenant_id, now)
            .into_iter()
            .filter(|tx| filter.matches(tx))
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });

        let total = matching.len() as i64;
        Ok((page.slice(&matching), total))
    }

    async fn find_interaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
        interaction_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<InteractionRecord>, StoreError> {
        let tx = self.find(tenant_id, transaction_id, now).await?;
        Ok(tx.and_then(|tx| tx.interactions.get(interaction_type).cloned()))
    }

    async fn list_interactions(
        &self,
        tenant_id: Uuid,
        filter: &InteractionFilter,
        page: Page,
        now: DateTime<Utc>,
    ) -> Result<(Vec<InteractionRecord>, i64), StoreError> {
        let mut records: Vec<InteractionRecord> = self
            .live(tenant_id, now)
            .into_iter()
            .flat_map(|tx| tx.interactions.into_values())
            .filter(|record| filter.matches(record))
            .collect();
        records.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
                .then_with(|| a.interaction_type.cmp(&b.interaction_type))
        });

        let total = records.len() as i64;
        Ok((page.slice(&records), total))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let before = self.transactions.len();
        self.transactions.retain(|_, tx| !tx.is_expired(now));
        Ok(before.saturating_sub(self.transactions.len()) as u64)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOrganizationDirectory {
    organizations: DashMap<Uuid, HashSet<Uuid>>,
}

impl InMemoryOrganizationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, organization_id: Uuid, tenant_id: Uuid) {
        self.organizations
            .entry(organization_id)
            .or_default()
            .insert(tenant_id);
    }
}

#[async_trait]
impl OrganizationDirectory for InMemoryOrganizationDirectory {
    async fn organization_exists(&self, organization_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.organizations.contains_key(&organization_id))
    }

    async fn tenant_in_organization(
        &self,
        organization_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<bool, StoreError> {
        Ok(self
            .organizations
            .get(&organization_id)
            .map(|tenants| tenants.contains(&tenant_id))
            .unwrap_or(false))
    }
}
