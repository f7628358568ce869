//! Permission resolution for single-user reads.

use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use crate::models::{User, UserView};
use crate::services::context::RequestContext;
use crate::services::error::UserError;
use crate::services::roles_groups::RolesGroupsAggregator;

// Direct grants plus grants inherited through roles. UNION ALL keeps a
// permission granted both ways twice; callers only rely on membership.
const RESOLVE_SQL: &str = r#"
    WITH grants AS (
        SELECT up.user_id, p.name::text AS name
        FROM user_permissions up
        JOIN permissions p ON p.id = up.permission_id AND p.deleted_at IS NULL AND p.status = 'O'
        WHERE up.deleted_at IS NULL AND up.status = 'O'
        UNION ALL
        SELECT ur.user_id, p.name::text AS name
        FROM user_roles ur
        JOIN roles r ON r.id = ur.role_id AND r.deleted_at IS NULL AND r.status = 'O'
        JOIN role_permissions rp ON rp.role_id = r.id AND rp.deleted_at IS NULL AND rp.status = 'O'
        JOIN permissions p ON p.id = rp.permission_id AND p.deleted_at IS NULL AND p.status = 'O'
        WHERE ur.deleted_at IS NULL AND ur.status = 'O'
    )
    SELECT
        u.*,
        COALESCE(array_agg(g.name) FILTER (WHERE g.name IS NOT NULL), '{}'::text[]) AS permissions
    FROM users u
    LEFT JOIN grants g ON g.user_id = u.id
    WHERE u.uuid = $1
    GROUP BY u.id
"#;

#[derive(FromRow)]
struct UserWithPermissions {
    #[sqlx(flatten)]
    user: User,
    permissions: Vec<String>,
}

/// Loads one user with its permissions and merges roles and groups in.
#[derive(Clone)]
pub struct PermissionResolver {
    pool: PgPool,
    roles_groups: RolesGroupsAggregator,
}

impl PermissionResolver {
    pub fn new(pool: PgPool, roles_groups: RolesGroupsAggregator) -> Self {
        Self { pool, roles_groups }
    }

    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id(), user_uuid = %uuid))]
    pub async fn resolve_one(&self, ctx: &RequestContext, uuid: Uuid) -> Result<UserView, UserError> {
        let row = ctx
            .storage("resolve_permissions", async {
                sqlx::query_as::<_, UserWithPermissions>(RESOLVE_SQL)
                    .bind(uuid)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| UserError::storage("resolve_permissions", e))
            })
            .await?
            .ok_or(UserError::not_found("user"))?;

        // Inactive users carry no roles or groups.
        let (roles, groups) = if row.user.is_active() {
            self.roles_groups.roles_and_groups(ctx, uuid).await?
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(UserView {
            user: row.user,
            permissions: row.permissions,
            roles,
            groups,
        })
    }
}
