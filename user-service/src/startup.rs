//! Application startup and lifecycle management.

use std::sync::Arc;
use std::time::Duration;

use service_core::error::AppError;

use crate::config::{AuditConfig, UserServiceConfig};
use crate::services::metrics::gather_metrics;
use crate::services::{AuditLogger, AuditSink, AuditWorker, Database, PgAuditSink, ServiceSettings, UserService};

/// Owns the storage handle, the audit worker and the user service built
/// on top of them.
pub struct Application {
    db: Database,
    users: UserService,
    audit_worker: AuditWorker,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: UserServiceConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: UserServiceConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: UserServiceConfig, run_migrations: bool) -> Result<Self, AppError> {
        let db = Database::connect(&config.database).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let sink = Arc::new(PgAuditSink::new(db.pool().clone()));
        Ok(Self::assemble(db, sink, config.settings(), &config.audit))
    }

    /// Wire an existing storage handle and audit sink. Must be called from
    /// within a Tokio runtime.
    pub fn assemble(
        db: Database,
        sink: Arc<dyn AuditSink>,
        settings: ServiceSettings,
        audit: &AuditConfig,
    ) -> Self {
        let (logger, audit_worker) = AuditLogger::spawn(sink, audit);
        let users = UserService::new(db.pool().clone(), logger, settings);

        tracing::info!(
            default_limit = settings.limits.default_limit,
            max_limit = settings.limits.max_limit,
            timeout_ms = settings.default_timeout.as_millis() as u64,
            "User service ready"
        );

        Self {
            db,
            users,
            audit_worker,
        }
    }

    pub fn users(&self) -> &UserService {
        &self.users
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Prometheus text exposition of every registered metric.
    pub fn metrics(&self) -> String {
        gather_metrics()
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.db.health_check().await
    }

    /// Drain pending audit records, then close the pool.
    pub async fn shutdown(self, grace: Duration) {
        self.audit_worker.shutdown(grace).await;
        self.db.close().await;
        tracing::info!("User service stopped");
    }
}
