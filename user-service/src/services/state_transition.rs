//! Soft-delete and status toggle for every lifecycle-bearing table.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{Relation, StatusCode, Transition, TransitionOutcome};
use crate::services::context::RequestContext;
use crate::services::error::UserError;

#[derive(FromRow)]
struct TransitionRow {
    id: i64,
    deleted_at: Option<DateTime<Utc>>,
    status: String,
    previous_deleted_at: Option<DateTime<Utc>>,
    previous_status: String,
}

/// SET list applied to the locked row aliased `prior`.
fn set_clause(transition: Transition) -> String {
    match transition {
        // Existing deletion time wins, so repeating the delete changes nothing.
        Transition::SoftDelete => "deleted_at = COALESCE(prior.deleted_at, NOW())".to_string(),
        Transition::ToggleStatus => format!(
            "status = {}, updated_at = NOW()",
            StatusCode::toggle_expr("prior.status")
        ),
    }
}

/// Locate by external id, lock, mutate and return before/after in one
/// statement.
fn transition_sql(relation: Relation, transition: Transition) -> String {
    let table = relation.table();
    format!(
        "WITH prior AS (SELECT id, deleted_at, status FROM {table} WHERE uuid = $1 FOR UPDATE) \
         UPDATE {table} t SET {set} FROM prior WHERE t.id = prior.id \
         RETURNING t.id, t.deleted_at, t.status, \
         prior.deleted_at AS previous_deleted_at, prior.status AS previous_status",
        table = table,
        set = set_clause(transition),
    )
}

fn message(relation: Relation, transition: Transition, row: &TransitionRow) -> String {
    let entity = relation.entity();
    match transition {
        Transition::SoftDelete if row.previous_deleted_at.is_some() => {
            format!("{} already deleted", entity)
        }
        Transition::SoftDelete => format!("{} deleted", entity),
        Transition::ToggleStatus => match StatusCode::parse(&row.status) {
            Some(StatusCode::Active) => format!("{} activated", entity),
            _ => format!("{} suspended", entity),
        },
    }
}

#[derive(Clone)]
pub struct StateTransitionEngine {
    pool: PgPool,
}

impl StateTransitionEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Same as [`set_status`](Self::set_status), with the transition named by
    /// the column it touches (`deleted_at` or `status`).
    pub async fn set_status_by_field(
        &self,
        ctx: &RequestContext,
        relation: Relation,
        uuid: Uuid,
        field: &str,
    ) -> Result<TransitionOutcome, UserError> {
        let transition = Transition::from_column(field).ok_or_else(|| {
            UserError::constraint(format!("{} is not a lifecycle field", field))
        })?;
        self.set_status(ctx, relation, uuid, transition).await
    }

    /// Apply `transition` to the row of `relation` with external id `uuid`.
    #[instrument(
        skip(self, ctx),
        fields(request_id = %ctx.request_id(), table = relation.table(), uuid = %uuid)
    )]
    pub async fn set_status(
        &self,
        ctx: &RequestContext,
        relation: Relation,
        uuid: Uuid,
        transition: Transition,
    ) -> Result<TransitionOutcome, UserError> {
        let sql = transition_sql(relation, transition);

        let row = ctx
            .storage("set_status", async {
                sqlx::query_as::<_, TransitionRow>(&sql)
                    .bind(uuid)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| UserError::storage("set_status", e))
            })
            .await?
            .ok_or(UserError::not_found(relation.entity()))?;

        let message = message(relation, transition, &row);

        info!(
            id = row.id,
            column = transition.column(),
            status = %row.status,
            deleted_at = ?row.deleted_at,
            "{}",
            message
        );

        Ok(TransitionOutcome {
            id: row.id,
            previous_deleted_at: row.previous_deleted_at,
            deleted_at: row.deleted_at,
            previous_status: row.previous_status,
            status: row.status,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(previous_deleted_at: Option<DateTime<Utc>>, status: &str) -> TransitionRow {
        TransitionRow {
            id: 1,
            deleted_at: Some(Utc::now()),
            status: status.to_string(),
            previous_deleted_at,
            previous_status: "O".to_string(),
        }
    }

    #[test]
    fn table_name_comes_from_relation() {
        let sql = transition_sql(Relation::UserRoles, Transition::SoftDelete);
        assert!(sql.contains("FROM user_roles WHERE uuid = $1 FOR UPDATE"));
        assert!(sql.contains("UPDATE user_roles t SET deleted_at = COALESCE(prior.deleted_at, NOW())"));
        assert!(sql.contains("prior.status AS previous_status"));
    }

    #[test]
    fn soft_delete_leaves_updated_at_alone() {
        let sql = transition_sql(Relation::Users, Transition::SoftDelete);
        assert!(sql.contains("COALESCE(prior.deleted_at, NOW())"));
        assert!(!sql.contains("updated_at"));
    }

    #[test]
    fn toggle_flips_between_open_and_suspended() {
        let sql = transition_sql(Relation::Users, Transition::ToggleStatus);
        assert!(sql.contains("CASE WHEN prior.status = 'O' THEN 'S' ELSE 'O' END"));
        assert!(sql.contains("updated_at = NOW()"));
    }

    #[test]
    fn messages_describe_what_happened() {
        assert_eq!(
            message(Relation::Users, Transition::SoftDelete, &row(None, "O")),
            "user deleted"
        );
        assert_eq!(
            message(
                Relation::Users,
                Transition::SoftDelete,
                &row(Some(Utc::now()), "O")
            ),
            "user already deleted"
        );
        assert_eq!(
            message(Relation::Roles, Transition::ToggleStatus, &row(None, "S")),
            "role suspended"
        );
        assert_eq!(
            message(Relation::Groups, Transition::ToggleStatus, &row(None, "O")),
            "group activated"
        );
    }
}
