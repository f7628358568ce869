//! User Service entry point.
//!
//! Applies migrations, starts the audit worker and keeps the storage pool
//! healthy until a shutdown signal arrives.

use std::time::Duration;

use service_core::observability::init_tracing;
use tokio::signal;
use user_service::config::UserServiceConfig;
use user_service::startup::Application;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = UserServiceConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "Starting user-service"
    );

    tracing::info!(
        service_name = %config.service_name,
        db_max_connections = %config.database.max_connections,
        db_min_connections = %config.database.min_connections,
        query_max_limit = %config.query.max_limit,
        audit_workers = %config.audit.workers,
        "Configuration loaded"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut health = tokio::time::interval(HEALTH_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = health.tick() => {
                if let Err(e) = app.health_check().await {
                    tracing::warn!(error = %e, "Health check failed - database unavailable");
                }
            }
        }
    }

    app.shutdown(SHUTDOWN_GRACE).await;
    tracing::info!("Service shutdown complete");
    Ok(())
}
