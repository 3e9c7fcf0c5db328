use std::time::Duration;

use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Pool shared by the Postgres stores. Schema lives in `./migrations`.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[tracing::instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .idle_timeout(IDLE_TIMEOUT)
            .test_before_acquire(true)
            .connect(database_url)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("PostgreSQL connection failed: {}", e))
            })?;

        tracing::info!(max_connections, "Connected to policy database");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;

        tracing::info!("Policy schema is up to date");
        Ok(())
    }
}
