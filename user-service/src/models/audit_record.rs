//! Audit record model - old/new value pair for one mutation attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mutation verb recorded with each audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Post,
    Put,
    Patch,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Post => "POST",
            AuditAction::Put => "PUT",
            AuditAction::Patch => "PATCH",
            AuditAction::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One audit entry. Created once per mutation attempt, never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    /// Internal id of the subject, when the mutation got far enough to know it.
    pub entity_id: Option<i64>,
    pub entity_type: String,
    pub action: AuditAction,
    pub old_value: Option<Value>,
    pub new_value: Value,
    /// Message of the error the mutation ended with, if any.
    pub error: Option<String>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        entity_type: impl Into<String>,
        action: AuditAction,
        entity_id: Option<i64>,
        old_value: Option<Value>,
        new_value: Value,
    ) -> Self {
        Self {
            entity_id,
            entity_type: entity_type.into(),
            action,
            old_value,
            new_value,
            error: None,
            request_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_error<E: std::fmt::Display>(mut self, error: Option<&E>) -> Self {
        self.error = error.map(|e| e.to_string());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn actions_render_as_verbs() {
        assert_eq!(AuditAction::Post.as_str(), "POST");
        assert_eq!(AuditAction::Patch.to_string(), "PATCH");
        assert_eq!(serde_json::to_value(AuditAction::Delete).unwrap(), "DELETE");
    }

    #[test]
    fn error_context_is_attached() {
        let record = AuditRecord::new("user", AuditAction::Put, Some(1), None, json!({}))
            .with_error(Some(&"transaction failed"))
            .with_request_id("req-1");
        assert!(!record.succeeded());
        assert_eq!(record.error.as_deref(), Some("transaction failed"));
        assert_eq!(record.request_id.as_deref(), Some("req-1"));

        let ok = AuditRecord::new("user", AuditAction::Post, Some(1), None, json!({}))
            .with_error::<String>(None);
        assert!(ok.succeeded());
    }
}
