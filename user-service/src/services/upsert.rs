//! Create-or-replace by external id, in one conflict-resolving statement.

use once_cell::sync::Lazy;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::models::{attribute_bag, AuditAction, AuditRecord, User, UserInput};
use crate::services::audit::AuditLogger;
use crate::services::context::RequestContext;
use crate::services::error::UserError;
use crate::utils::password::{Password, StoredCredential};

/// Columns a replace may overwrite. `id`, `uuid`, `password`, `created_at`
/// and the lifecycle columns are never touched by conflict resolution.
pub const MUTABLE_COLUMNS: &[&str] = &[
    "username",
    "email",
    "first_name",
    "middle_name",
    "last_name",
    "mobile",
    "address",
    "optin",
    "metadata",
    "is_admin",
];

/// `col = EXCLUDED.col, ...` for every allowed column, then the update
/// timestamp refresh.
pub fn conflict_set_clause(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| format!("{column} = EXCLUDED.{column}"))
        .chain(std::iter::once("updated_at = NOW()".to_string()))
        .collect::<Vec<_>>()
        .join(", ")
}

static UPSERT_SQL: Lazy<String> = Lazy::new(|| {
    format!(
        "INSERT INTO users (uuid, username, password, email, first_name, middle_name, last_name, \
         mobile, address, optin, metadata, is_admin) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         ON CONFLICT (uuid) DO UPDATE SET {} \
         RETURNING *",
        conflict_set_clause(MUTABLE_COLUMNS)
    )
});

/// Whether an upsert created a row or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStatus {
    Created,
    Replaced,
}

impl UpsertStatus {
    pub fn http_status(&self) -> u16 {
        match self {
            UpsertStatus::Created => 201,
            UpsertStatus::Replaced => 200,
        }
    }

    pub fn action(&self) -> AuditAction {
        match self {
            UpsertStatus::Created => AuditAction::Post,
            UpsertStatus::Replaced => AuditAction::Put,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub status: UpsertStatus,
    pub user: User,
}

/// What is known about an attempt so far; feeds the audit record even
/// when the attempt fails midway.
struct Attempt {
    status: UpsertStatus,
    prior: Option<User>,
}

#[derive(Clone)]
pub struct UpsertCoordinator {
    pool: PgPool,
    audit: AuditLogger,
}

impl UpsertCoordinator {
    pub fn new(pool: PgPool, audit: AuditLogger) -> Self {
        Self { pool, audit }
    }

    /// Insert `input`, or replace the row sharing its external id.
    ///
    /// Every attempt is audited, failed ones included, without waiting for
    /// the audit write.
    #[instrument(skip(self, ctx, input), fields(request_id = %ctx.request_id(), username = %input.username))]
    pub async fn upsert(
        &self,
        ctx: &RequestContext,
        input: UserInput,
    ) -> Result<UpsertOutcome, UserError> {
        let mut attempt = Attempt {
            status: UpsertStatus::Created,
            prior: None,
        };

        let result = self.execute(ctx, &input, &mut attempt).await;

        let new_value = match &result {
            Ok(user) => serde_json::to_value(user),
            Err(_) => serde_json::to_value(&input),
        }
        .unwrap_or_default();
        let old_value = attempt
            .prior
            .as_ref()
            .and_then(|prior| serde_json::to_value(prior).ok());
        let entity_id = match &result {
            Ok(user) => Some(user.id),
            Err(_) => attempt.prior.as_ref().map(|prior| prior.id),
        };

        self.audit.record(
            AuditRecord::new(
                "user",
                attempt.status.action(),
                entity_id,
                old_value,
                new_value,
            )
            .with_error(result.as_ref().err())
            .with_request_id(ctx.request_id()),
        );

        match result {
            Ok(user) => {
                info!(
                    user_id = user.id,
                    user_uuid = %user.uuid,
                    status = attempt.status.http_status(),
                    "User upserted"
                );
                Ok(UpsertOutcome {
                    status: attempt.status,
                    user,
                })
            }
            Err(e) => {
                warn!(kind = ?e.kind(), error = %e, "User upsert failed");
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        input: &UserInput,
        attempt: &mut Attempt,
    ) -> Result<User, UserError> {
        input.validate()?;
        attribute_bag("address", input.address.as_ref())?;
        attribute_bag("metadata", input.metadata.as_ref())?;

        let supplied = input.external_id()?;
        let uuid = match supplied {
            Some(uuid) => {
                attempt.prior = self.find_by_uuid(ctx, uuid).await?;
                uuid
            }
            None => Uuid::new_v4(),
        };
        if attempt.prior.is_some() {
            attempt.status = UpsertStatus::Replaced;
        }

        let password_hash = match Password::from_input(input.password.as_deref()) {
            Some(plain) => Some(StoredCredential::hash(plain).await?),
            None => None,
        };

        ctx.storage("upsert_user", async {
            let mut retried = false;
            loop {
                let credential = password_hash.as_ref().map(StoredCredential::as_str);
                match self.write(uuid, input, credential).await {
                    Ok(user) => return Ok(user),
                    // A concurrent create with the same external id can trip a
                    // secondary unique index before the uuid arbiter sees the
                    // committed row; the second try resolves to an update.
                    Err(sqlx::Error::Database(ref db_err))
                        if db_err.is_unique_violation() && supplied.is_some() && !retried =>
                    {
                        retried = true;
                    }
                    Err(e) => return Err(UserError::transaction("upsert_user", e)),
                }
            }
        })
        .await
    }

    async fn write(
        &self,
        uuid: Uuid,
        input: &UserInput,
        password_hash: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(UPSERT_SQL.as_str())
            .bind(uuid)
            .bind(&input.username)
            .bind(password_hash)
            .bind(&input.email)
            .bind(&input.first_name)
            .bind(&input.middle_name)
            .bind(&input.last_name)
            .bind(&input.mobile)
            .bind(non_null(&input.address))
            .bind(input.optin)
            .bind(non_null(&input.metadata))
            .bind(input.is_admin)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(user)
    }

    async fn find_by_uuid(&self, ctx: &RequestContext, uuid: Uuid) -> Result<Option<User>, UserError> {
        ctx.storage("find_user", async {
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE uuid = $1")
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| UserError::storage("find_user", e))
        })
        .await
    }
}

/// JSON `null` is stored as SQL NULL.
fn non_null(value: &Option<Value>) -> Option<&Value> {
    value.as_ref().filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clause_lists_allowed_columns_then_timestamp() {
        assert_eq!(
            conflict_set_clause(&["username", "email"]),
            "username = EXCLUDED.username, email = EXCLUDED.email, updated_at = NOW()"
        );
        assert_eq!(conflict_set_clause(&[]), "updated_at = NOW()");
    }

    #[test]
    fn identity_and_credentials_are_never_overwritten() {
        let clause = conflict_set_clause(MUTABLE_COLUMNS);
        for protected in ["id =", "uuid =", "password =", "created_at =", "deleted_at =", "status ="] {
            assert!(
                !clause.split(", ").any(|part| part.starts_with(protected)),
                "{protected} must not be in the SET list"
            );
        }
        assert!(clause.contains("metadata = EXCLUDED.metadata"));
        assert!(clause.ends_with("updated_at = NOW()"));
    }

    #[test]
    fn statement_resolves_conflicts_on_external_id() {
        assert!(UPSERT_SQL.contains("ON CONFLICT (uuid) DO UPDATE SET username = EXCLUDED.username"));
        assert!(UPSERT_SQL.ends_with("RETURNING *"));
    }

    #[test]
    fn status_hints_follow_outcome() {
        assert_eq!(UpsertStatus::Created.http_status(), 201);
        assert_eq!(UpsertStatus::Created.action(), AuditAction::Post);
        assert_eq!(UpsertStatus::Replaced.http_status(), 200);
        assert_eq!(UpsertStatus::Replaced.action(), AuditAction::Put);
    }

    #[test]
    fn json_null_bags_become_sql_null() {
        assert!(non_null(&Some(Value::Null)).is_none());
        assert!(non_null(&None).is_none());
        let bag = Some(serde_json::json!({"a": 1}));
        assert!(non_null(&bag).is_some());
    }
}
