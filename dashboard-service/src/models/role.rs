//! Roles and the persisted role record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Effective role of the signed-in identity.
///
/// The model is flat: `Admin` and `User` are the recognized values and no
/// role implies another. Stored strings outside that pair are kept verbatim
/// in `Other` rather than coerced, so they never match a required role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    User,
    Other(String),
}

impl Role {
    pub const DEFAULT: Role = Role::User;

    /// Interpret a stored role string. Case-sensitive, no trimming.
    pub fn from_stored(value: &str) -> Self {
        match value {
            "admin" => Role::Admin,
            "user" => Role::User,
            other => Role::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Other(value) => value,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Role::Other(_))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::from_stored(&value)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

/// Role resolver: a missing record falls back to `user`; an existing record
/// yields its stored value unchanged, including unrecognized strings.
pub fn resolve_role(record_exists: bool, stored_role: Option<&str>) -> Role {
    match (record_exists, stored_role) {
        (true, Some(stored)) => Role::from_stored(stored),
        _ => Role::DEFAULT,
    }
}

/// Persisted mapping from identity id to a role string (`userRoles/{uid}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub uid: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_utc: Option<DateTime<Utc>>,
}

impl RoleRecord {
    pub fn new(uid: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            role: Some(role.into()),
            updated_utc: Some(Utc::now()),
        }
    }
}

/// Resolve the effective role from the outcome of a record lookup.
pub fn resolve_record(record: Option<&RoleRecord>) -> Role {
    resolve_role(
        record.is_some(),
        record.and_then(|r| r.role.as_deref()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_record_resolves_to_user() {
        assert_eq!(resolve_role(false, None), Role::User);
        assert_eq!(resolve_role(false, Some("admin")), Role::User);
        assert_eq!(resolve_role(false, Some("bogus")), Role::User);
    }

    #[test]
    fn existing_record_is_returned_verbatim() {
        assert_eq!(resolve_role(true, Some("admin")), Role::Admin);
        assert_eq!(resolve_role(true, Some("user")), Role::User);

        let bogus = resolve_role(true, Some("bogus"));
        assert_eq!(bogus, Role::Other("bogus".to_string()));
        assert_eq!(bogus.as_str(), "bogus");
    }

    #[test]
    fn unknown_roles_are_not_coerced() {
        assert_eq!(Role::from_stored("Admin"), Role::Other("Admin".to_string()));
        assert_eq!(Role::from_stored(" admin"), Role::Other(" admin".to_string()));
        assert!(!Role::from_stored("manager").is_recognized());
    }

    #[test]
    fn record_without_role_field_falls_back() {
        let record = RoleRecord {
            uid: "u1".to_string(),
            role: None,
            updated_utc: None,
        };
        assert_eq!(resolve_record(Some(&record)), Role::User);
        assert_eq!(resolve_record(None), Role::User);
        assert_eq!(resolve_record(Some(&RoleRecord::new("u1", "admin"))), Role::Admin);
    }

    #[test]
    fn roles_serialize_as_plain_strings() {
        assert_eq!(serde_json::to_value(Role::Admin).unwrap(), "admin");
        assert_eq!(
            serde_json::from_value::<Role>(serde_json::json!("auditor")).unwrap(),
            Role::Other("auditor".to_string())
        );
    }
}
