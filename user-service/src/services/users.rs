//! Caller-facing user operations and the read pipeline.

use std::time::Duration;

use serde_json::json;
use sqlx::{PgPool, QueryBuilder};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    AuditAction, AuditRecord, LoginCandidate, QueryParams, ReadResult, Relation, Transition,
    TransitionOutcome, User, UserInput,
};
use crate::services::audit::AuditLogger;
use crate::services::context::RequestContext;
use crate::services::error::UserError;
use crate::services::permissions::PermissionResolver;
use crate::services::roles_groups::RolesGroupsAggregator;
use crate::services::sanitizer::{sanitize, PageLimits, QuerySpec};
use crate::services::state_transition::StateTransitionEngine;
use crate::services::upsert::{UpsertCoordinator, UpsertOutcome};

/// Search and sort allow-lists of the users table.
pub const USER_QUERY_SPEC: QuerySpec = QuerySpec {
    search_columns: &["username", "first_name", "middle_name", "last_name"],
    sort_fields: &["username", "email", "created_at", "updated_at"],
    default_sort: "id",
    tiebreaker: "id",
};

/// Per-service settings that shape every call.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub limits: PageLimits,
    /// Applied to contexts that carry no timeout of their own.
    pub default_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            limits: PageLimits::default(),
            default_timeout: Duration::from_secs(5),
        }
    }
}

/// Every user operation behind one injected pool and audit logger.
#[derive(Clone)]
pub struct UserService {
    pool: PgPool,
    audit: AuditLogger,
    settings: ServiceSettings,
    resolver: PermissionResolver,
    roles_groups: RolesGroupsAggregator,
    transitions: StateTransitionEngine,
    upserts: UpsertCoordinator,
}

impl UserService {
    pub fn new(pool: PgPool, audit: AuditLogger, settings: ServiceSettings) -> Self {
        let roles_groups = RolesGroupsAggregator::new(pool.clone());
        Self {
            resolver: PermissionResolver::new(pool.clone(), roles_groups.clone()),
            transitions: StateTransitionEngine::new(pool.clone()),
            upserts: UpsertCoordinator::new(pool.clone(), audit.clone()),
            roles_groups,
            pool,
            audit,
            settings,
        }
    }

    pub fn roles_groups(&self) -> &RolesGroupsAggregator {
        &self.roles_groups
    }

    pub fn transitions(&self) -> &StateTransitionEngine {
        &self.transitions
    }

    fn context(&self, ctx: &RequestContext) -> RequestContext {
        ctx.or_timeout(self.settings.default_timeout)
    }

    /// `"all"` selects a sanitized page plus total count; anything else is
    /// the external id of one user, returned with its projections.
    #[instrument(skip(self, params), fields(request_id = %params.ctx.request_id(), uuid = %params.uuid))]
    pub async fn read(&self, params: QueryParams) -> Result<ReadResult, UserError> {
        let ctx = self.context(&params.ctx);

        if params.is_collection() {
            let (items, total) = self.read_collection(&ctx, &params).await?;
            return Ok(ReadResult::Collection { items, total });
        }

        // An unparseable id cannot name a stored row.
        let uuid = Uuid::parse_str(params.uuid.trim()).map_err(|_| UserError::not_found("user"))?;
        let view = self.resolver.resolve_one(&ctx, uuid).await?;
        Ok(ReadResult::Item(Box::new(view)))
    }

    async fn read_collection(
        &self,
        ctx: &RequestContext,
        params: &QueryParams,
    ) -> Result<(Vec<User>, i64), UserError> {
        let query = sanitize(params, &USER_QUERY_SPEC, self.settings.limits);

        let page = ctx.storage("read_users", async {
            let mut qb = query.apply(QueryBuilder::new("SELECT * FROM users"));
            let rows = qb.build_query_as::<User>().fetch_all(&self.pool).await;
            rows.map_err(|e| UserError::storage("read_users", e))
        });
        let count = ctx.storage("count_users", async {
            let mut qb = query.apply_count(QueryBuilder::new("SELECT COUNT(*) FROM users"));
            let total = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await;
            total.map_err(|e| UserError::storage("count_users", e))
        });

        futures::future::try_join(page, count).await
    }

    /// Candidate row for authentication, matched on username or email.
    #[instrument(skip(self, ctx, login), fields(request_id = %ctx.request_id()))]
    pub async fn find_login_candidate(
        &self,
        ctx: &RequestContext,
        login: &str,
    ) -> Result<LoginCandidate, UserError> {
        let ctx = self.context(ctx);
        let login = login.trim();
        // No stored username or email can contain NUL.
        if login.is_empty() || login.contains('\0') {
            return Err(UserError::not_found("user"));
        }

        let user = ctx
            .storage("find_login_candidate", async {
                sqlx::query_as::<_, User>(
                    r#"
                    SELECT * FROM users
                    WHERE (username = $1 OR email = $1) AND deleted_at IS NULL
                    ORDER BY (username = $1) DESC
                    LIMIT 1
                    "#,
                )
                .bind(login)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| UserError::storage("find_login_candidate", e))
            })
            .await?
            .ok_or(UserError::not_found("user"))?;

        Ok(LoginCandidate { user })
    }

    pub async fn upsert(
        &self,
        ctx: &RequestContext,
        input: UserInput,
    ) -> Result<UpsertOutcome, UserError> {
        let ctx = self.context(ctx);
        self.upserts.upsert(&ctx, input).await
    }

    /// Soft-delete. Repeating it returns the original deletion time.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id(), user_uuid = %uuid))]
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        uuid: Uuid,
    ) -> Result<TransitionOutcome, UserError> {
        let ctx = self.context(ctx);
        let result = self
            .transitions
            .set_status(&ctx, Relation::Users, uuid, Transition::SoftDelete)
            .await;

        let (entity_id, old_value, new_value) = match &result {
            Ok(outcome) => (
                Some(outcome.id),
                Some(json!({ "deleted_at": outcome.previous_deleted_at })),
                json!({ "deleted_at": outcome.deleted_at }),
            ),
            Err(_) => (None, None, json!({ "uuid": uuid })),
        };
        self.audit_transition(&ctx, AuditAction::Delete, entity_id, old_value, new_value, &result);

        let outcome = result?;
        info!(deleted_at = ?outcome.deleted_at, "{}", outcome.message);
        Ok(outcome)
    }

    /// Flip the status between active and suspended.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id(), user_uuid = %uuid))]
    pub async fn update_status(
        &self,
        ctx: &RequestContext,
        uuid: Uuid,
    ) -> Result<TransitionOutcome, UserError> {
        let ctx = self.context(ctx);
        let result = self
            .transitions
            .set_status(&ctx, Relation::Users, uuid, Transition::ToggleStatus)
            .await;

        let (entity_id, old_value, new_value) = match &result {
            Ok(outcome) => (
                Some(outcome.id),
                Some(json!({ "status": outcome.previous_status })),
                json!({ "status": outcome.status }),
            ),
            Err(_) => (None, None, json!({ "uuid": uuid })),
        };
        self.audit_transition(&ctx, AuditAction::Patch, entity_id, old_value, new_value, &result);

        let outcome = result?;
        info!(status = %outcome.status, "{}", outcome.message);
        Ok(outcome)
    }

    fn audit_transition(
        &self,
        ctx: &RequestContext,
        action: AuditAction,
        entity_id: Option<i64>,
        old_value: Option<serde_json::Value>,
        new_value: serde_json::Value,
        result: &Result<TransitionOutcome, UserError>,
    ) {
        self.audit.record(
            AuditRecord::new("user", action, entity_id, old_value, new_value)
                .with_error(result.as_ref().err())
                .with_request_id(ctx.request_id()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sanitizer::SortDirection;

    #[test]
    fn user_sort_allow_list_excludes_sensitive_columns() {
        assert!(!USER_QUERY_SPEC.sort_fields.contains(&"password"));
        let params = QueryParams::collection(RequestContext::new()).with_sort("password", "desc");
        let query = sanitize(&params, &USER_QUERY_SPEC, PageLimits::default());
        assert_eq!(query.sort_column, "id");
        assert_eq!(query.direction, SortDirection::Desc);
    }

    #[test]
    fn user_search_covers_name_columns() {
        let params = QueryParams::collection(RequestContext::new()).with_search("ann");
        let query = sanitize(&params, &USER_QUERY_SPEC, PageLimits::default());
        let built = query.apply(QueryBuilder::new("SELECT * FROM users"));
        let sql = built.sql();
        for column in ["username", "first_name", "middle_name", "last_name"] {
            assert!(sql.contains(&format!("COALESCE({column}, '') ILIKE")));
        }
        assert!(!sql.contains("COALESCE(email"));
    }

    #[test]
    fn default_settings_match_configuration_defaults() {
        let settings = ServiceSettings::default();
        assert_eq!(settings.limits.default_limit, 20);
        assert_eq!(settings.limits.max_limit, 100);
        assert_eq!(settings.default_timeout, Duration::from_secs(5));
    }
}
