//! Services for user-service.

pub mod audit;
pub mod context;
pub mod database;
pub mod error;
pub mod metrics;
pub mod permissions;
pub mod roles_groups;
pub mod sanitizer;
pub mod state_transition;
pub mod upsert;
pub mod users;

pub use audit::{AuditLogger, AuditSink, AuditWorker, MemoryAuditSink, PgAuditSink};
pub use context::RequestContext;
pub use database::Database;
pub use error::{ErrorKind, UserError};
pub use permissions::PermissionResolver;
pub use roles_groups::{RolesGroupsAggregator, UserRolesGroups};
pub use sanitizer::{sanitize, PageLimits, QuerySpec, RowFilter, SanitizedQuery, SortDirection};
pub use state_transition::StateTransitionEngine;
pub use upsert::{UpsertCoordinator, UpsertOutcome, UpsertStatus};
pub use users::{ServiceSettings, UserService, USER_QUERY_SPEC};
