//! Storage collaborators. Each trait has a PostgreSQL implementation for
//! deployments and an in-memory one used by tests and local runs.

mod memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::utils::{EnabledFilter, Page};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AuthenticationPolicyConfig, AuthenticationTransaction, InteractionFilter, InteractionRecord,
    TransactionFilter,
};

pub use memory::{InMemoryOrganizationDirectory, InMemoryPolicyConfigStore, InMemoryTransactionStore};
pub use postgres::{PgOrganizationDirectory, PgPolicyConfigStore, PgTransactionStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Duplicate {0}")]
    Duplicate(String),

    #[error("Transaction {0} was modified concurrently")]
    VersionConflict(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored document could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Policy configs keyed by (tenant, config id). Reads hand out immutable
/// snapshots; a replace never mutates a snapshot already handed out.
#[async_trait]
pub trait PolicyConfigStore: Send + Sync {
    /// Fails with `Duplicate` if the id or the flow is already taken.
    async fn insert(
        &self,
        tenant_id: Uuid,
        config: &AuthenticationPolicyConfig,
    ) -> Result<(), StoreError>;

    /// Returns `false` when no config with that id exists.
    async fn replace(
        &self,
        tenant_id: Uuid,
        config: &AuthenticationPolicyConfig,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, tenant_id: Uuid, config_id: Uuid) -> Result<bool, StoreError>;

    async fn find(
        &self,
        tenant_id: Uuid,
        config_id: Uuid,
    ) -> Result<Option<Arc<AuthenticationPolicyConfig>>, StoreError>;

    /// Enabled or not; callers decide what a disabled config means.
    async fn find_by_flow(
        &self,
        tenant_id: Uuid,
        flow: &str,
    ) -> Result<Option<Arc<AuthenticationPolicyConfig>>, StoreError>;

    /// Ordered by creation time. Returns the page and the filtered total.
    async fn list(
        &self,
        tenant_id: Uuid,
        filter: EnabledFilter,
        page: Page,
    ) -> Result<(Vec<Arc<AuthenticationPolicyConfig>>, i64), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Authentication transactions with TTL. Anything past `expires_at` reads
/// as absent.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: &AuthenticationTransaction) -> Result<(), StoreError>;

    async fn find(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthenticationTransaction>, StoreError>;

    /// Compare-and-swap: persists `tx` (carrying its new version) only if the
    /// stored version still equals `expected_version`.
    async fn save(
        &self,
        tx: &AuthenticationTransaction,
        expected_version: i64,
    ) -> Result<(), StoreError>;

    /// Newest first.
    async fn list(
        &self,
        tenant_id: Uuid,
        filter: &TransactionFilter,
        page: Page,
        now: DateTime<Utc>,
    ) -> Result<(Vec<AuthenticationTransaction>, i64), StoreError>;

    async fn find_interaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
        interaction_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<InteractionRecord>, StoreError>;

    async fn list_interactions(
        &self,
        tenant_id: Uuid,
        filter: &InteractionFilter,
        page: Page,
        now: DateTime<Utc>,
    ) -> Result<(Vec<InteractionRecord>, i64), StoreError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Organization -> tenant assignments used to authorize management paths.
#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn organization_exists(&self, organization_id: Uuid) -> Result<bool, StoreError>;

    async fn tenant_in_organization(
        &self,
        organization_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<bool, StoreError>;
}
