use chrono::{DateTime, Utc};
use medcab_core::Credential;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Operator allowed to work the cabinet.
///
/// The passkey is never serialized.
///
/// # Examples
///
/// ```
/// use medcab_core::Credential;
/// use medcab_storage::models::UserRecord;
/// use chrono::Utc;
///
/// let user = UserRecord {
///     id: 1,
///     name: "Nurse Station A".to_string(),
///     role: "nurse".to_string(),
///     passkey: "4821".to_string(),
///     active: true,
///     created_at: Utc::now(),
/// };
///
/// assert!(user.verify(&Credential::new("4821").unwrap()));
/// assert!(!user.verify(&Credential::new("0000").unwrap()));
/// ```
#[derive(Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub role: String,
    #[serde(skip_serializing, default)]
    pub passkey: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// An active user ready for [`UserRepository::create`](crate::UserRepository::create).
    pub fn new(name: impl Into<String>, role: impl Into<String>, passkey: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            role: role.into(),
            passkey: passkey.into(),
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Constant-time passkey check. Inactive users never match.
    pub fn verify(&self, credential: &Credential) -> bool {
        let matches: bool = self
            .passkey
            .as_bytes()
            .ct_eq(credential.expose().as_bytes())
            .into();
        matches && self.active
    }
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
