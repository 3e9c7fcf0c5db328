//! PostgreSQL-backed stores. Policies are kept as one JSONB document per
//! config row so a single-row read is always a consistent snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::utils::{EnabledFilter, Page};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use tracing::instrument;
use uuid::Uuid;

use super::{OrganizationDirectory, PolicyConfigStore, StoreError, TransactionStore};
use crate::models::{
    AuthenticationPolicy, AuthenticationPolicyConfig, AuthenticationTransaction,
    InteractionFilter, InteractionRecord, RequestContext, TransactionFilter, TransactionStatus,
};
use crate::services::metrics::observe_query;

fn map_unique(err: sqlx::Error, what: impl FnOnce() -> String) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::Duplicate(what())
        }
        _ => StoreError::Database(err),
    }
}

#[derive(sqlx::FromRow)]
struct PolicyConfigRow {
    id: Uuid,
    flow: String,
    enabled: bool,
    policies: Json<Vec<AuthenticationPolicy>>,
}

impl From<PolicyConfigRow> for AuthenticationPolicyConfig {
    fn from(row: PolicyConfigRow) -> Self {
        Self {
            id: row.id,
            flow: row.flow,
            enabled: row.enabled,
            policies: row.policies.0,
        }
    }
}

#[derive(Clone)]
pub struct PgPolicyConfigStore {
    pool: PgPool,
}

impl PgPolicyConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyConfigStore for PgPolicyConfigStore {
    #[instrument(skip(self, config), fields(config_id = %config.id))]
    async fn insert(
        &self,
        tenant_id: Uuid,
        config: &AuthenticationPolicyConfig,
    ) -> Result<(), StoreError> {
        let _timer = observe_query("insert_policy_config");
        sqlx::query(
            r#"
            INSERT INTO authentication_policy_configs
                (tenant_id, id, flow, enabled, policies, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            "#,
        )
        .bind(tenant_id)
        .bind(config.id)
        .bind(&config.flow)
        .bind(config.enabled)
        .bind(Json(&config.policies))
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, || format!("config id {} or flow '{}'", config.id, config.flow)))?;
        Ok(())
    }

    #[instrument(skip(self, config), fields(config_id = %config.id))]
    async fn replace(
        &self,
        tenant_id: Uuid,
        config: &AuthenticationPolicyConfig,
    ) -> Result<bool, StoreError> {
        let _timer = observe_query("replace_policy_config");
        let result = sqlx::query(
            r#"
            UPDATE authentication_policy_configs
            SET flow = $3, enabled = $4, policies = $5, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(config.id)
        .bind(&config.flow)
        .bind(config.enabled)
        .bind(Json(&config.policies))
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, || format!("flow '{}'", config.flow)))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete(&self, tenant_id: Uuid, config_id: Uuid) -> Result<bool, StoreError> {
        let _timer = observe_query("delete_policy_config");
        let result = sqlx::query(
            "DELETE FROM authentication_policy_configs WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(config_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn find(
        &self,
        tenant_id: Uuid,
        config_id: Uuid,
    ) -> Result<Option<Arc<AuthenticationPolicyConfig>>, StoreError> {
        let _timer = observe_query("find_policy_config");
        let row = sqlx::query_as::<_, PolicyConfigRow>(
            r#"
            SELECT id, flow, enabled, policies
            FROM authentication_policy_configs
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(config_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Arc::new(r.into())))
    }

    #[instrument(skip(self))]
    async fn find_by_flow(
        &self,
        tenant_id: Uuid,
        flow: &str,
    ) -> Result<Option<Arc<AuthenticationPolicyConfig>>, StoreError> {
        let _timer = observe_query("find_policy_config_by_flow");
        let row = sqlx::query_as::<_, PolicyConfigRow>(
            r#"
            SELECT id, flow, enabled, policies
            FROM authentication_policy_configs
            WHERE tenant_id = $1 AND flow = $2
            "#,
        )
        .bind(tenant_id)
        .bind(flow)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Arc::new(r.into())))
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        tenant_id: Uuid,
        filter: EnabledFilter,
        page: Page,
    ) -> Result<(Vec<Arc<AuthenticationPolicyConfig>>, i64), StoreError> {
        let _timer = observe_query("list_policy_configs");
        let include_disabled = filter.include_disabled();

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM authentication_policy_configs
            WHERE tenant_id = $1 AND ($2 OR enabled)
            "#,
        )
        .bind(tenant_id)
        .bind(include_disabled)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, PolicyConfigRow>(
            r#"
            SELECT id, flow, enabled, policies
            FROM authentication_policy_configs
            WHERE tenant_id = $1 AND ($2 OR enabled)
            ORDER BY created_at, id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant_id)
        .bind(include_disabled)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.into_iter().map(|r| Arc::new(r.into())).collect(), total))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    tenant_id: Uuid,
    transaction_id: Uuid,
    flow: String,
    request: Json<RequestContext>,
    last_interaction_type: Option<String>,
    status: String,
    user_id: Option<String>,
    acr: Option<String>,
    amr: Json<Vec<String>>,
    denied_scopes: Json<Vec<String>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct InteractionRow {
    transaction_id: Uuid,
    interaction_type: String,
    call_count: i64,
    success_count: i64,
    failure_count: i64,
    payload: Json<serde_json::Value>,
    updated_at: DateTime<Utc>,
}

impl From<InteractionRow> for InteractionRecord {
    fn from(row: InteractionRow) -> Self {
        Self {
            transaction_id: row.transaction_id,
            interaction_type: row.interaction_type,
            call_count: row.call_count,
            success_count: row.success_count,
            failure_count: row.failure_count,
            payload: row.payload.0,
            updated_at: row.updated_at,
        }
    }
}

impl TransactionRow {
    fn into_transaction(
        self,
        interactions: BTreeMap<String, InteractionRecord>,
    ) -> Result<AuthenticationTransaction, StoreError> {
        let status = TransactionStatus::from_string(&self.status).ok_or_else(|| {
            StoreError::Decode(serde::de::Error::custom(format!(
                "unknown transaction status '{}'",
                self.status
            )))
        })?;

        Ok(AuthenticationTransaction {
            transaction_id: self.transaction_id,
            tenant_id: self.tenant_id,
            flow: self.flow,
            request: self.request.0,
            last_interaction_type: self.last_interaction_type,
            status,
            user_id: self.user_id,
            interactions,
            acr: self.acr,
            amr: self.amr.0,
            denied_scopes: self.denied_scopes.0,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
        })
    }
}

const TRANSACTION_COLUMNS: &str = "tenant_id, transaction_id, flow, request, \
    last_interaction_type, status, user_id, acr, amr, denied_scopes, version, \
    created_at, updated_at, expires_at";

const INTERACTION_COLUMNS: &str = "i.transaction_id, i.interaction_type, i.call_count, \
    i.success_count, i.failure_count, i.payload, i.updated_at";

#[derive(Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_interactions(
        &self,
        tenant_id: Uuid,
        transaction_ids: &[Uuid],
    ) -> Result<BTreeMap<Uuid, BTreeMap<String, InteractionRecord>>, StoreError> {
        let rows = sqlx::query_as::<_, InteractionRow>(&format!(
            "SELECT {} FROM authentication_interactions i \
             WHERE i.tenant_id = $1 AND i.transaction_id = ANY($2)",
            INTERACTION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(transaction_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: BTreeMap<Uuid, BTreeMap<String, InteractionRecord>> = BTreeMap::new();
        for row in rows {
            let record = InteractionRecord::from(row);
            grouped
                .entry(record.transaction_id)
                .or_default()
                .insert(record.interaction_type.clone(), record);
        }
        Ok(grouped)
    }

    async fn upsert_interactions(
        conn: &mut sqlx::PgConnection,
        tx: &AuthenticationTransaction,
    ) -> Result<(), StoreError> {
        for record in tx.interactions.values() {
            sqlx::query(
                r#"
                INSERT INTO authentication_interactions
                    (tenant_id, transaction_id, interaction_type, call_count,
                     success_count, failure_count, payload, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (tenant_id, transaction_id, interaction_type) DO UPDATE SET
                    call_count = EXCLUDED.call_count,
                    success_count = EXCLUDED.success_count,
                    failure_count = EXCLUDED.failure_count,
                    payload = EXCLUDED.payload,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(tx.tenant_id)
            .bind(tx.transaction_id)
            .bind(&record.interaction_type)
            .bind(record.call_count)
            .bind(record.success_count)
            .bind(record.failure_count)
            .bind(Json(&record.payload))
            .bind(record.updated_at)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    #[instrument(skip(self, tx), fields(transaction_id = %tx.transaction_id))]
    async fn insert(&self, tx: &AuthenticationTransaction) -> Result<(), StoreError> {
        let _timer = observe_query("insert_transaction");
        let mut db_tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO authentication_transactions
                (tenant_id, transaction_id, flow, client_id, request, last_interaction_type,
                 status, user_id, acr, amr, denied_scopes, version,
                 created_at, updated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(tx.tenant_id)
        .bind(tx.transaction_id)
        .bind(&tx.flow)
        .bind(&tx.request.client_id)
        .bind(Json(&tx.request))
        .bind(&tx.last_interaction_type)
        .bind(tx.status.as_str())
        .bind(&tx.user_id)
        .bind(&tx.acr)
        .bind(Json(&tx.amr))
        .bind(Json(&tx.denied_scopes))
        .bind(tx.version)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .bind(tx.expires_at)
        .execute(&mut *db_tx)
        .await
        .map_err(|e| map_unique(e, || format!("transaction {}", tx.transaction_id)))?;

        Self::upsert_interactions(&mut db_tx, tx).await?;
        db_tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthenticationTransaction>, StoreError> {
        let _timer = observe_query("find_transaction");
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM authentication_transactions \
             WHERE tenant_id = $1 AND transaction_id = $2 AND expires_at > $3",
            TRANSACTION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(transaction_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut interactions = self.load_interactions(tenant_id, &[transaction_id]).await?;
        let records = interactions.remove(&transaction_id).unwrap_or_default();
        row.into_transaction(records).map(Some)
    }

    #[instrument(skip(self, tx), fields(transaction_id = %tx.transaction_id))]
    async fn save(
        &self,
        tx: &AuthenticationTransaction,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let _timer = observe_query("save_transaction");
        let mut db_tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE authentication_transactions
            SET last_interaction_type = $3, status = $4, user_id = $5, acr = $6,
                amr = $7, denied_scopes = $8, version = $9, updated_at = $10
            WHERE tenant_id = $1 AND transaction_id = $2 AND version = $11
            "#,
        )
        .bind(tx.tenant_id)
        .bind(tx.transaction_id)
        .bind(&tx.last_interaction_type)
        .bind(tx.status.as_str())
        .bind(&tx.user_id)
        .bind(&tx.acr)
        .bind(Json(&tx.amr))
        .bind(Json(&tx.denied_scopes))
        .bind(tx.version)
        .bind(tx.updated_at)
        .bind(expected_version)
        .execute(&mut *db_tx)
        .await?;

        if result.rows_affected() == 0 {
            db_tx.rollback().await?;
            return Err(StoreError::VersionConflict(tx.transaction_id));
        }

        Self::upsert_interactions(&mut db_tx, tx).await?;
        db_tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, filter))]
    async fn list(
        &self,
        tenant_id: Uuid,
        filter: &TransactionFilter,
        page: Page,
        now: DateTime<Utc>,
    ) -> Result<(Vec<AuthenticationTransaction>, i64), StoreError> {
        let _timer = observe_query("list_transactions");
        let predicate = "tenant_id = $1 AND expires_at > $2 \
             AND ($3::text IS NULL OR status = $3) \
             AND ($4::text IS NULL OR user_id = $4) \
             AND ($5::text IS NULL OR client_id = $5) \
             AND ($6::text IS NULL OR flow = $6)";
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM authentication_transactions WHERE {}",
            predicate
        ))
        .bind(tenant_id)
        .bind(now)
        .bind(status)
        .bind(&filter.user_id)
        .bind(&filter.client_id)
        .bind(&filter.flow)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM authentication_transactions WHERE {} \
             ORDER BY created_at DESC, transaction_id LIMIT $7 OFFSET $8",
            TRANSACTION_COLUMNS, predicate
        ))
        .bind(tenant_id)
        .bind(now)
        .bind(status)
        .bind(&filter.user_id)
        .bind(&filter.client_id)
        .bind(&filter.flow)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.transaction_id).collect();
        let mut interactions = self.load_interactions(tenant_id, &ids).await?;

        let list = rows
            .into_iter()
            .map(|row| {
                let records = interactions.remove(&row.transaction_id).unwrap_or_default();
                row.into_transaction(records)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((list, total))
    }

    #[instrument(skip(self))]
    async fn find_interaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
        interaction_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<InteractionRecord>, StoreError> {
        let _timer = observe_query("find_interaction");
        let row = sqlx::query_as::<_, InteractionRow>(&format!(
            "SELECT {} FROM authentication_interactions i \
             JOIN authentication_transactions t \
               ON t.tenant_id = i.tenant_id AND t.transaction_id = i.transaction_id \
             WHERE i.tenant_id = $1 AND i.transaction_id = $2 \
               AND i.interaction_type = $3 AND t.expires_at > $4",
            INTERACTION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(transaction_id)
        .bind(interaction_type)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(InteractionRecord::from))
    }

    #[instrument(skip(self, filter))]
    async fn list_interactions(
        &self,
        tenant_id: Uuid,
        filter: &InteractionFilter,
        page: Page,
        now: DateTime<Utc>,
    ) -> Result<(Vec<InteractionRecord>, i64), StoreError> {
        let _timer = observe_query("list_interactions");
        let from = "FROM authentication_interactions i \
             JOIN authentication_transactions t \
               ON t.tenant_id = i.tenant_id AND t.transaction_id = i.transaction_id \
             WHERE i.tenant_id = $1 AND t.expires_at > $2 \
               AND ($3::uuid IS NULL OR i.transaction_id = $3) \
               AND ($4::text IS NULL OR i.interaction_type = $4)";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", from))
            .bind(tenant_id)
            .bind(now)
            .bind(filter.transaction_id)
            .bind(&filter.interaction_type)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, InteractionRow>(&format!(
            "SELECT {} {} ORDER BY i.updated_at DESC, i.transaction_id, i.interaction_type \
             LIMIT $5 OFFSET $6",
            INTERACTION_COLUMNS, from
        ))
        .bind(tenant_id)
        .bind(now)
        .bind(filter.transaction_id)
        .bind(&filter.interaction_type)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.into_iter().map(InteractionRecord::from).collect(), total))
    }

    #[instrument(skip(self))]
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let _timer = observe_query("purge_expired_transactions");
        let result = sqlx::query("DELETE FROM authentication_transactions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgOrganizationDirectory {
    pool: PgPool,
}

impl PgOrganizationDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationDirectory for PgOrganizationDirectory {
    #[instrument(skip(self))]
    async fn organization_exists(&self, organization_id: Uuid) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM organizations WHERE organization_id = $1)",
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    #[instrument(skip(self))]
    async fn tenant_in_organization(
        &self,
        organization_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM organization_tenants
                WHERE organization_id = $1 AND tenant_id = $2
            )
            "#,
        )
        .bind(organization_id)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
