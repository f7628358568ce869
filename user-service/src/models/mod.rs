//! Domain models for user-service.

mod audit_record;
mod lifecycle;
mod query;
mod user;

pub use audit_record::{AuditAction, AuditRecord};
pub use lifecycle::{Relation, StatusCode, Transition, TransitionOutcome};
pub use query::{QueryParams, ReadResult, COLLECTION_SENTINEL};
pub use user::{attribute_bag, AttributeBag, LoginCandidate, User, UserInput, UserView};
