//! Application startup and lifecycle management.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use service_core::error::AppError;
use service_core::utils::PaginationRules;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::PolicyServiceConfig;
use crate::services::metrics::init_metrics;
use crate::services::store::{
    InMemoryOrganizationDirectory, InMemoryPolicyConfigStore, InMemoryTransactionStore,
    OrganizationDirectory, PgOrganizationDirectory, PgPolicyConfigStore, PgTransactionStore,
    PolicyConfigStore, TransactionStore,
};
use crate::services::{AcrResolver, Database, PolicyConfigService, TokenVerifier, TransactionEngine};
use crate::{build_router, AppState};

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    purge_interval: Duration,
}

impl Application {
    pub async fn build(config: PolicyServiceConfig) -> Result<Self, AppError> {
        init_metrics().map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Failed to register metrics: {}", e))
        })?;

        let (config_store, transaction_store, directory) = open_stores(&config).await?;
        let verifier = build_verifier(&config)?;

        let engine = TransactionEngine::new(
            config_store.clone(),
            transaction_store,
            AcrResolver::new(
                config.acr.values_supported.clone(),
                config.acr.default_acr.clone(),
            ),
            chrono::Duration::seconds(config.transaction.ttl_seconds),
        );

        let state = AppState {
            policies: PolicyConfigService::new(config_store.clone()),
            engine: Arc::new(engine),
            config_store,
            directory,
            verifier,
            internal_api_key: Arc::from(config.security.internal_api_key.as_str()),
            pagination: PaginationRules {
                default_limit: config.pagination.default_limit,
                max_limit: config.pagination.max_limit,
            },
            service_name: config.service_name.clone(),
            service_version: config.service_version.clone(),
            allowed_origins: config.security.allowed_origins.clone(),
        };

        let addr: SocketAddr = config.common.bind_address().parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Invalid bind address: {}", e))
        })?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Policy service listener bound");

        Ok(Self {
            port,
            listener,
            state,
            purge_interval: Duration::from_secs(config.transaction.purge_interval_seconds),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let purge_task = spawn_purge_task(self.state.engine.clone(), self.purge_interval);
        let router = build_router(self.state);

        tracing::info!(
            service = "policy-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        purge_task.abort();
        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

type Stores = (
    Arc<dyn PolicyConfigStore>,
    Arc<dyn TransactionStore>,
    Arc<dyn OrganizationDirectory>,
);

async fn open_stores(config: &PolicyServiceConfig) -> Result<Stores, AppError> {
    let Some(url) = config.database.url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; using in-memory stores");
        let configs: Arc<dyn PolicyConfigStore> = Arc::new(InMemoryPolicyConfigStore::new());
        let transactions: Arc<dyn TransactionStore> = Arc::new(InMemoryTransactionStore::new());
        let seeded = InMemoryOrganizationDirectory::new();
        for (organization_id, tenant_id) in &config.dev.organization_tenants {
            seeded.assign(*organization_id, *tenant_id);
        }
        tracing::info!(
            pairs = config.dev.organization_tenants.len(),
            "Seeded in-memory organization directory"
        );
        let directory: Arc<dyn OrganizationDirectory> = Arc::new(seeded);
        return Ok((configs, transactions, directory));
    };

    let db = Database::connect(url, config.database.max_connections)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;
    db.migrate().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to run migrations");
        e
    })?;

    if !config.dev.organization_tenants.is_empty() {
        tracing::warn!("DEV_ORGANIZATION_TENANTS ignored when DATABASE_URL is set");
    }

    let pool = db.pool().clone();
    let configs: Arc<dyn PolicyConfigStore> = Arc::new(PgPolicyConfigStore::new(pool.clone()));
    let transactions: Arc<dyn TransactionStore> = Arc::new(PgTransactionStore::new(pool.clone()));
    let directory: Arc<dyn OrganizationDirectory> = Arc::new(PgOrganizationDirectory::new(pool));
    Ok((configs, transactions, directory))
}

fn build_verifier(config: &PolicyServiceConfig) -> Result<TokenVerifier, AppError> {
    let issuer = config.jwt.issuer.as_deref();
    let audience = config.jwt.audience.as_deref();

    if let Some(path) = config.jwt.public_key_path.as_deref() {
        return TokenVerifier::from_rsa_pem_file(path, issuer, audience)
            .map_err(AppError::ConfigError);
    }
    if let Some(secret) = config.jwt.hs256_secret.as_deref() {
        tracing::warn!("Verifying operator tokens with a shared HS256 secret");
        return Ok(TokenVerifier::from_secret(secret.as_bytes(), issuer, audience));
    }
    Err(AppError::ConfigError(anyhow::anyhow!(
        "No JWT verification key configured"
    )))
}

fn spawn_purge_task(engine: Arc<TransactionEngine>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = engine.purge_expired().await {
                tracing::error!(error = %e, "Failed to purge expired transactions");
            }
        }
    })
}
