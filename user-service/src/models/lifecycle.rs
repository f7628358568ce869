//! Lifecycle vocabulary shared by every soft-deletable, status-gated table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single-character status codes stored in the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// `O` - open/active.
    Active,
    /// `S` - suspended.
    Suspended,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Active => "O",
            StatusCode::Suspended => "S",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code.trim() {
            "O" => Some(StatusCode::Active),
            "S" => Some(StatusCode::Suspended),
            _ => None,
        }
    }

    /// SQL expression flipping `column`: active becomes suspended, any
    /// other code becomes active.
    pub fn toggle_expr(column: &str) -> String {
        format!(
            "CASE WHEN {column} = '{active}' THEN '{suspended}' ELSE '{active}' END",
            column = column,
            active = StatusCode::Active.as_str(),
            suspended = StatusCode::Suspended.as_str(),
        )
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tables carrying `uuid`, `status`, `deleted_at` and `updated_at`.
///
/// Table names reach SQL only through this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Users,
    Roles,
    Groups,
    Permissions,
    UserRoles,
    UserGroups,
    UserPermissions,
    RolePermissions,
}

impl Relation {
    pub fn table(&self) -> &'static str {
        match self {
            Relation::Users => "users",
            Relation::Roles => "roles",
            Relation::Groups => "groups",
            Relation::Permissions => "permissions",
            Relation::UserRoles => "user_roles",
            Relation::UserGroups => "user_groups",
            Relation::UserPermissions => "user_permissions",
            Relation::RolePermissions => "role_permissions",
        }
    }

    /// Singular noun used in messages and audit entity tags.
    pub fn entity(&self) -> &'static str {
        match self {
            Relation::Users => "user",
            Relation::Roles => "role",
            Relation::Groups => "group",
            Relation::Permissions => "permission",
            Relation::UserRoles => "user role",
            Relation::UserGroups => "user group",
            Relation::UserPermissions => "user permission",
            Relation::RolePermissions => "role permission",
        }
    }
}

/// Supported lifecycle mutations, keyed by the column they touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Sets `deleted_at` once; repeating it is a no-op.
    SoftDelete,
    /// Flips `status` between active and suspended.
    ToggleStatus,
}

impl Transition {
    pub fn column(&self) -> &'static str {
        match self {
            Transition::SoftDelete => "deleted_at",
            Transition::ToggleStatus => "status",
        }
    }

    pub fn from_column(column: &str) -> Option<Self> {
        match column {
            "deleted_at" => Some(Transition::SoftDelete),
            "status" => Some(Transition::ToggleStatus),
            _ => None,
        }
    }
}

/// Before/after state of a lifecycle mutation, enough to audit it without a
/// second read.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub id: i64,
    pub previous_deleted_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub previous_status: String,
    pub status: String,
    pub message: String,
}

impl TransitionOutcome {
    /// Whether the mutation changed anything.
    pub fn changed(&self) -> bool {
        self.previous_deleted_at != self.deleted_at || self.previous_status != self.status
    }
}
