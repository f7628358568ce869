//! Fire-and-forget audit trail.
//!
//! Mutations hand an [`AuditRecord`] to [`AuditLogger::record`], which only
//! enqueues it. A detached worker drains the queue into an [`AuditSink`]
//! with bounded concurrency. Nothing on this path can fail or delay the
//! mutation that produced the record, and the worker does not observe any
//! request's cancellation. Failed writes are logged and counted, never
//! retried.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AuditConfig;
use crate::models::AuditRecord;
use crate::services::metrics::record_audit_outcome;

/// Destination of audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, record: &AuditRecord) -> anyhow::Result<()>;
}

/// Writes records to the `audit_logs` table.
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn write(&self, record: &AuditRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (entity_id, entity_type, action, old_value, new_value, error, request_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.entity_id)
        .bind(&record.entity_type)
        .bind(record.action.as_str())
        .bind(&record.old_value)
        .bind(&record.new_value)
        .bind(&record.error)
        .bind(&record.request_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Keeps records in memory. Handy when storage is substituted in tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Poll until at least `count` records arrived or `timeout` elapsed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<AuditRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let records = self.records();
            if records.len() >= count || tokio::time::Instant::now() >= deadline {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, record: &AuditRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("audit buffer poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

/// Cheap, cloneable handle used by mutations to enqueue records.
#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditLogger {
    /// Start the background worker and return the enqueue handle with it.
    pub fn spawn(sink: Arc<dyn AuditSink>, config: &AuditConfig) -> (Self, AuditWorker) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let workers = config.workers.max(1);

        tracing::info!(
            queue_capacity = config.queue_capacity,
            workers = workers,
            "Starting audit worker pool"
        );

        let handle = tokio::spawn(run_worker(rx, sink, workers, shutdown.clone()));

        (Self { tx }, AuditWorker { handle, shutdown })
    }

    /// Enqueue a record without waiting. Records that do not fit in the
    /// queue, or arrive after shutdown, are dropped with a warning.
    pub fn record(&self, record: AuditRecord) {
        if let Err(e) = self.tx.try_send(record) {
            let (reason, record) = match e {
                mpsc::error::TrySendError::Full(r) => ("queue full", r),
                mpsc::error::TrySendError::Closed(r) => ("worker stopped", r),
            };
            record_audit_outcome(&record.entity_type, "dropped");
            tracing::warn!(
                reason = reason,
                entity_type = %record.entity_type,
                entity_id = ?record.entity_id,
                action = %record.action,
                "Audit record dropped"
            );
        }
    }
}

/// Owner of the background task; used to drain and stop it.
pub struct AuditWorker {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl AuditWorker {
    /// Stop accepting records, flush what is queued and wait for in-flight
    /// writes, up to `grace`.
    pub async fn shutdown(self, grace: Duration) {
        tracing::info!("Initiating audit worker shutdown");
        self.shutdown.cancel();
        if tokio::time::timeout(grace, self.handle).await.is_err() {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "Audit worker did not drain in time"
            );
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<AuditRecord>,
    sink: Arc<dyn AuditSink>,
    workers: usize,
    shutdown: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut draining = false;

    loop {
        let next = if draining {
            rx.recv().await
        } else {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    // Refuse new records but keep what is already queued.
                    rx.close();
                    draining = true;
                    continue;
                }
                next = rx.recv() => next,
            }
        };

        let Some(record) = next else {
            break;
        };

        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let sink = sink.clone();
        tokio::spawn(async move {
            write_record(sink.as_ref(), &record).await;
            drop(permit);
        });
    }

    // Wait for in-flight writes.
    let _ = permits.acquire_many(workers as u32).await;
    tracing::info!("Audit worker stopped");
}

async fn write_record(sink: &dyn AuditSink, record: &AuditRecord) {
    match sink.write(record).await {
        Ok(()) => {
            record_audit_outcome(&record.entity_type, "written");
            tracing::debug!(
                entity_type = %record.entity_type,
                entity_id = ?record.entity_id,
                action = %record.action,
                "Audit record written"
            );
        }
        Err(e) => {
            record_audit_outcome(&record.entity_type, "failed");
            tracing::error!(
                error = %e,
                entity_type = %record.entity_type,
                entity_id = ?record.entity_id,
                action = %record.action,
                "Failed to write audit record"
            );
        }
    }
}
