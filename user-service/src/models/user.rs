//! User model - persisted row, read projection and upsert payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::models::lifecycle::StatusCode;
use crate::services::error::UserError;
use crate::utils::password::{Password, StoredCredential};

/// Free-form key/value metadata kept in JSONB columns. Key order holds in
/// memory only; JSONB stores keys in its own order, so compare bags by
/// content once they have been read back.
pub type AttributeBag = serde_json::Map<String, Value>;

/// Persisted user row.
///
/// Roles, groups and permissions never live here; see [`UserView`].
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub uuid: Uuid,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    pub email: String,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub mobile: Option<String>,
    pub address: Option<Value>,
    pub optin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
    pub is_admin: bool,
    pub is_online: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub status: String,
}

impl User {
    /// Active means open status and not soft-deleted.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none() && self.status == StatusCode::Active.as_str()
    }
}

/// A user as returned by single-item reads: the stored row plus the
/// projections computed from its grants.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    pub permissions: Vec<String>,
    pub roles: Vec<String>,
    pub groups: Vec<String>,
}

impl UserView {
    pub fn new(user: User) -> Self {
        Self {
            user,
            permissions: Vec::new(),
            roles: Vec::new(),
            groups: Vec::new(),
        }
    }
}

/// Upsert payload. An empty or absent `uuid` means create.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UserInput {
    #[serde(default)]
    pub uuid: Option<String>,
    #[validate(length(min = 1, max = 150, message = "Username must be 1-150 characters"))]
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub address: Option<Value>,
    #[serde(default)]
    pub optin: bool,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub is_admin: bool,
}

impl UserInput {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            ..Default::default()
        }
    }

    /// The caller-supplied external id, if it is non-blank.
    ///
    /// A non-blank value that is not a UUID is rejected rather than silently
    /// turned into a create.
    pub fn external_id(&self) -> Result<Option<Uuid>, UserError> {
        match self.uuid.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Uuid::parse_str(raw).map(Some).map_err(|_| {
                UserError::constraint(format!("uuid '{}' is not a valid identifier", raw))
            }),
        }
    }
}

/// Row returned by the login lookup. Carries the stored credential hash so
/// the authentication layer can verify it.
#[derive(Debug, Clone)]
pub struct LoginCandidate {
    pub user: User,
}

impl LoginCandidate {
    pub fn verify_password(&self, password: &str) -> bool {
        match (
            self.user.password.as_deref(),
            Password::from_input(Some(password)),
        ) {
            (Some(stored), Some(attempt)) => StoredCredential::from_column(stored).matches(&attempt),
            _ => false,
        }
    }
}

/// Checks that a structured attribute column holds a JSON object.
pub fn attribute_bag(column: &str, value: Option<&Value>) -> Result<Option<AttributeBag>, UserError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(UserError::constraint(format!(
            "{} must be a JSON object",
            column
        ))),
    }
}

#[cfg(test)]
pub(crate) fn sample_user() -> User {
    let now = Utc::now();
    User {
        id: 7,
        uuid: Uuid::new_v4(),
        username: "alice".to_string(),
        password: Some("$argon2id$secret".to_string()),
        email: "a@x.com".to_string(),
        first_name: Some("Alice".to_string()),
        middle_name: None,
        last_name: None,
        mobile: None,
        address: Some(serde_json::json!({"city": "Lisbon"})),
        optin: false,
        last_login: None,
        metadata: None,
        is_admin: false,
        is_online: false,
        created_at: now,
        updated_at: now,
        deleted_at: None,
        status: "O".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn password_is_never_serialized() {
        let value = serde_json::to_value(sample_user()).unwrap();
        assert!(value.get("password").is_none());
        assert_eq!(value["username"], "alice");
    }

    #[test]
    fn view_flattens_user_and_adds_projections() {
        let mut view = UserView::new(sample_user());
        view.roles = vec!["admin".to_string()];
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["username"], "alice");
        assert_eq!(value["roles"], json!(["admin"]));
        assert_eq!(value["groups"], json!([]));
        assert!(value.get("password").is_none());
    }

    #[test]
    fn active_requires_open_status_and_no_deletion() {
        let mut user = sample_user();
        assert!(user.is_active());
        user.status = "S".to_string();
        assert!(!user.is_active());
        user.status = "O".to_string();
        user.deleted_at = Some(Utc::now());
        assert!(!user.is_active());
    }

    #[test]
    fn blank_external_id_means_create() {
        let mut input = UserInput::new("alice", "a@x.com");
        assert_eq!(input.external_id().unwrap(), None);
        input.uuid = Some("   ".to_string());
        assert_eq!(input.external_id().unwrap(), None);
    }

    #[test]
    fn malformed_external_id_is_a_constraint_violation() {
        let mut input = UserInput::new("alice", "a@x.com");
        input.uuid = Some("not-a-uuid".to_string());
        let err = input.external_id().unwrap_err();
        assert!(matches!(err, UserError::ConstraintViolation { .. }));
    }

    #[test]
    fn attribute_bag_accepts_objects_only() {
        let bag = attribute_bag("address", Some(&json!({"b": 1, "a": 2})))
            .unwrap()
            .unwrap();
        let keys: Vec<_> = bag.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);

        assert!(attribute_bag("address", None).unwrap().is_none());
        assert!(attribute_bag("address", Some(&Value::Null)).unwrap().is_none());
        assert!(attribute_bag("address", Some(&json!([1, 2]))).is_err());
        assert!(attribute_bag("metadata", Some(&json!("text"))).is_err());
    }

    #[test]
    fn input_validation_rejects_bad_email() {
        let input = UserInput::new("alice", "not-an-email");
        assert!(input.validate().is_err());
        let input = UserInput::new("", "a@x.com");
        assert!(input.validate().is_err());
        let input = UserInput::new("alice", "a@x.com");
        assert!(input.validate().is_ok());
    }

    #[test]
    fn login_candidate_without_password_never_verifies() {
        let mut user = sample_user();
        user.password = None;
        assert!(!LoginCandidate { user }.verify_password("anything"));
    }
}
