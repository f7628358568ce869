//! Roles/groups aggregation: union of role edges and group edges, then one
//! aggregated row per user.

use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use crate::services::context::RequestContext;
use crate::services::error::UserError;

/// Role and group edges are projected onto the same three-column shape
/// `(user_id, role_name, group_name)` and combined with UNION, so a user
/// with only roles, only groups, or several of each still yields a single
/// row with two independently sized arrays.
const ROLES_GROUPS_SQL: &str = r#"
    WITH edges AS (
        SELECT ur.user_id, r.name::text AS role_name, NULL::text AS group_name
        FROM user_roles ur
        JOIN roles r ON r.id = ur.role_id AND r.deleted_at IS NULL AND r.status = 'O'
        WHERE ur.deleted_at IS NULL AND ur.status = 'O'
        UNION
        SELECT ug.user_id, NULL::text AS role_name, g.name::text AS group_name
        FROM user_groups ug
        JOIN groups g ON g.id = ug.group_id AND g.deleted_at IS NULL AND g.status = 'O'
        WHERE ug.deleted_at IS NULL AND ug.status = 'O'
    )
    SELECT
        u.id AS user_id,
        u.uuid,
        COALESCE(array_agg(e.role_name ORDER BY e.role_name) FILTER (WHERE e.role_name IS NOT NULL), '{}'::text[]) AS roles,
        COALESCE(array_agg(e.group_name ORDER BY e.group_name) FILTER (WHERE e.group_name IS NOT NULL), '{}'::text[]) AS groups
    FROM users u
    LEFT JOIN edges e ON e.user_id = u.id
    WHERE u.uuid = ANY($1) AND u.deleted_at IS NULL AND u.status = 'O'
    GROUP BY u.id, u.uuid
    ORDER BY u.id
"#;

/// Aggregated roles and groups of one user.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserRolesGroups {
    pub user_id: i64,
    pub uuid: Uuid,
    pub roles: Vec<String>,
    pub groups: Vec<String>,
}

#[derive(Clone)]
pub struct RolesGroupsAggregator {
    pool: PgPool,
}

impl RolesGroupsAggregator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// One row per alive, active user among `uuids`; users without any
    /// edge get empty arrays. Unknown, deleted or suspended users are
    /// absent from the result.
    #[instrument(skip(self, ctx, uuids), fields(request_id = %ctx.request_id(), users = uuids.len()))]
    pub async fn for_users(
        &self,
        ctx: &RequestContext,
        uuids: &[Uuid],
    ) -> Result<Vec<UserRolesGroups>, UserError> {
        if uuids.is_empty() {
            return Ok(Vec::new());
        }

        ctx.storage("roles_and_groups", async {
            sqlx::query_as::<_, UserRolesGroups>(ROLES_GROUPS_SQL)
                .bind(uuids)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| UserError::storage("roles_and_groups", e))
        })
        .await
    }

    /// Roles and groups of one user. Empty arrays, not an error, when the
    /// user has none or is not active.
    pub async fn roles_and_groups(
        &self,
        ctx: &RequestContext,
        uuid: Uuid,
    ) -> Result<(Vec<String>, Vec<String>), UserError> {
        let row = self.for_users(ctx, &[uuid]).await?.into_iter().next();
        Ok(row.map(|r| (r.roles, r.groups)).unwrap_or_default())
    }
}
