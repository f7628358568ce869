use serde::Serialize;
use service_core::error::AppError;
use thiserror::Error;

/// Coarse classification callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ConstraintViolation,
    TransactionFailure,
    StorageUnavailable,
}

/// Errors surfaced by user-service operations.
///
/// Display text is written here, never copied from the driver; the driver
/// error stays reachable through `source()` for logging.
#[derive(Error, Debug)]
pub enum UserError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("Constraint violation: {message}")]
    ConstraintViolation {
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Transaction failed during {operation}")]
    TransactionFailure {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Storage unavailable during {operation}: {reason}")]
    StorageUnavailable {
        operation: &'static str,
        reason: &'static str,
        #[source]
        source: Option<sqlx::Error>,
    },
}

impl UserError {
    pub fn not_found(entity: &'static str) -> Self {
        UserError::NotFound { entity }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        UserError::ConstraintViolation {
            message: message.into(),
            source: None,
        }
    }

    pub fn unavailable(operation: &'static str, reason: &'static str) -> Self {
        UserError::StorageUnavailable {
            operation,
            reason,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UserError::NotFound { .. } => ErrorKind::NotFound,
            UserError::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            UserError::TransactionFailure { .. } => ErrorKind::TransactionFailure,
            UserError::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
        }
    }

    /// Classify a driver error raised outside a transaction.
    pub fn storage(operation: &'static str, err: sqlx::Error) -> Self {
        Self::classify(operation, err, false)
    }

    /// Classify a driver error raised while a transaction was open.
    pub fn transaction(operation: &'static str, err: sqlx::Error) -> Self {
        Self::classify(operation, err, true)
    }

    fn classify(operation: &'static str, err: sqlx::Error, in_transaction: bool) -> Self {
        match err {
            sqlx::Error::RowNotFound => UserError::NotFound { entity: "record" },
            sqlx::Error::Database(ref db_err) => {
                let message = match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation => {
                        Some(constraint_message(db_err.constraint(), "value already exists"))
                    }
                    sqlx::error::ErrorKind::CheckViolation => Some(constraint_message(
                        db_err.constraint(),
                        "value failed a check constraint",
                    )),
                    sqlx::error::ErrorKind::ForeignKeyViolation => {
                        Some("referenced record does not exist".to_string())
                    }
                    sqlx::error::ErrorKind::NotNullViolation => {
                        Some("required field is missing".to_string())
                    }
                    _ => None,
                };
                match message {
                    Some(message) => UserError::ConstraintViolation {
                        message,
                        source: Some(err),
                    },
                    None => Self::fallback(operation, err, in_transaction),
                }
            }
            sqlx::Error::PoolTimedOut => UserError::StorageUnavailable {
                operation,
                reason: "connection pool timed out",
                source: Some(err),
            },
            sqlx::Error::PoolClosed => UserError::StorageUnavailable {
                operation,
                reason: "connection pool closed",
                source: Some(err),
            },
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::WorkerCrashed => {
                UserError::StorageUnavailable {
                    operation,
                    reason: "connection failed",
                    source: Some(err),
                }
            }
            other => Self::fallback(operation, other, in_transaction),
        }
    }

    fn fallback(operation: &'static str, err: sqlx::Error, in_transaction: bool) -> Self {
        if in_transaction {
            UserError::TransactionFailure {
                operation,
                source: err,
            }
        } else {
            UserError::StorageUnavailable {
                operation,
                reason: "query failed",
                source: Some(err),
            }
        }
    }
}

/// Human-readable message for a named constraint of the schema.
fn constraint_message(constraint: Option<&str>, default: &str) -> String {
    match constraint {
        Some("users_username_key") => "username already exists".to_string(),
        Some("users_email_key") => "email already exists".to_string(),
        Some("users_mobile_key") => "mobile already exists".to_string(),
        Some("users_address_check") => "address must be a JSON object".to_string(),
        Some("users_metadata_check") => "metadata must be a JSON object".to_string(),
        _ => default.to_string(),
    }
}

impl From<validator::ValidationErrors> for UserError {
    fn from(errors: validator::ValidationErrors) -> Self {
        UserError::constraint(errors.to_string())
    }
}

impl From<UserError> for AppError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::NotFound { entity } => {
                AppError::NotFound(anyhow::anyhow!("{} not found", entity))
            }
            UserError::ConstraintViolation { message, .. } => {
                AppError::Conflict(anyhow::anyhow!(message))
            }
            e @ UserError::TransactionFailure { .. } => {
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            }
            UserError::StorageUnavailable { .. } => AppError::ServiceUnavailable,
        }
    }
}
