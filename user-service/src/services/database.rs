//! PostgreSQL handle for user-service: pool setup, schema migrations and
//! a readiness probe that checks the access tables are in place.

use std::time::Duration;

use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::services::error::UserError;
use crate::services::metrics::DB_QUERY_DURATION;

/// Tables every component reads or writes. A missing one means migrations
/// have not been applied to the schema the pool points at.
pub const REQUIRED_TABLES: &[&str] = &[
    "users",
    "roles",
    "groups",
    "permissions",
    "user_roles",
    "user_groups",
    "user_permissions",
    "role_permissions",
    "audit_logs",
];

const MISSING_TABLES_SQL: &str =
    "SELECT t FROM unnest($1::text[]) AS t WHERE to_regclass(t) IS NULL ORDER BY t";

/// Injected into every component; there is no global pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(config), fields(max = config.max_connections, min = config.min_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.url)
            .await
            .map_err(|e| AppError::from(UserError::storage("connect", e)))?;

        info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Ready when the database answers and every table in
    /// [`REQUIRED_TABLES`] resolves on the current `search_path`.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let missing = self.missing_tables().await?;
        if missing.is_empty() {
            return Ok(());
        }
        tracing::error!(missing = ?missing, "User schema incomplete");
        Err(AppError::ServiceUnavailable)
    }

    /// Names from [`REQUIRED_TABLES`] that do not exist.
    pub async fn missing_tables(&self) -> Result<Vec<String>, UserError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query_scalar(MISSING_TABLES_SQL)
            .bind(REQUIRED_TABLES)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| UserError::storage("health_check", e))
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running user schema migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!(tables = REQUIRED_TABLES.len(), "User schema up to date");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
