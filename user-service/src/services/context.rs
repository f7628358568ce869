//! Per-request execution context threaded through every storage call.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::services::error::UserError;
use crate::services::metrics::DB_QUERY_DURATION;

/// Request id, cancellation signal and optional deadline of one caller.
///
/// Cloning shares the cancellation token.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    cancellation: CancellationToken,
    timeout: Option<Duration>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            cancellation: CancellationToken::new(),
            timeout: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Ties this context to a parent token: cancelling the parent cancels
    /// this context, not the other way round.
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancellation = parent.child_token();
        self
    }

    /// Same context with `timeout` applied when none was set by the caller.
    pub fn or_timeout(&self, timeout: Duration) -> Self {
        let mut ctx = self.clone();
        ctx.timeout.get_or_insert(timeout);
        ctx
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Run one storage operation under this context.
    ///
    /// The future is dropped as soon as the context is cancelled or the
    /// deadline passes; an open transaction inside it rolls back on drop.
    pub async fn storage<T, F>(&self, operation: &'static str, fut: F) -> Result<T, UserError>
    where
        F: Future<Output = Result<T, UserError>>,
    {
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .unwrap_or_else(|_| Err(UserError::unavailable(operation, "timed out"))),
                None => fut.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => {
                Err(UserError::unavailable(operation, "cancelled"))
            }
            result = bounded => result,
        };

        timer.observe_duration();

        if let Err(ref e) = result {
            tracing::debug!(
                request_id = %self.request_id,
                operation = operation,
                kind = ?e.kind(),
                error = %e,
                "Storage operation failed"
            );
        }

        result
    }
}
