//! Credentials stored in `users.password`.
//!
//! Upsert hashes on the way in; the login lookup verifies on the way out.
//! Plaintext only ever lives in a [`Password`], whose `Debug` is redacted.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::services::error::UserError;

/// Plaintext password taken from an upsert payload or a login attempt.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    /// A blank or absent password means "leave the credential unset".
    pub fn from_input(raw: Option<&str>) -> Option<Self> {
        raw.filter(|p| !p.is_empty()).map(|p| Self(p.to_string()))
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// PHC-formatted Argon2id hash, the only form a credential is stored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential(String);

impl StoredCredential {
    /// Hash with a fresh salt on the blocking pool; Argon2 is deliberately
    /// slow and must not stall the runtime.
    pub async fn hash(password: Password) -> Result<Self, UserError> {
        tokio::task::spawn_blocking(move || Self::hash_now(&password))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Password hashing task failed");
                UserError::constraint("password could not be hashed")
            })?
    }

    fn hash_now(password: &Password) -> Result<Self, UserError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| Self(hash.to_string()))
            .map_err(|e| {
                tracing::warn!(error = %e, "Password rejected by hasher");
                UserError::constraint("password could not be hashed")
            })
    }

    /// Wrap a value read back from `users.password`.
    pub fn from_column(stored: &str) -> Self {
        Self(stored.to_string())
    }

    /// False for a wrong password and for a column that does not hold a
    /// PHC string.
    pub fn matches(&self, password: &Password) -> bool {
        match PasswordHash::new(&self.0) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "Stored credential is not a PHC hash");
                false
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
