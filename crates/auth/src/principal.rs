use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Role;

/// Identity of an authenticated principal (human user, service account, etc).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(Uuid);

impl PrincipalId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// The nil UUID never identifies a principal.
    pub fn is_valid(&self) -> bool {
        !self.0.is_nil()
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for PrincipalId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<PrincipalId> for Uuid {
    fn from(value: PrincipalId) -> Self {
        value.0
    }
}

impl FromStr for PrincipalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Account record handed to the issuer by the user store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub id: PrincipalId,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub active: bool,
}

impl PrincipalRecord {
    pub fn new(id: PrincipalId, email: impl Into<String>) -> Self {
        Self {
            id,
            first_name: None,
            last_name: None,
            email: email.into(),
            active: true,
        }
    }

    pub fn with_names(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }
}

/// Principal data embedded in every token.
///
/// Access tokens carry the display names; refresh tokens only the identity,
/// email and roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalSnapshot {
    pub id: PrincipalId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    pub email: String,

    #[serde(default)]
    pub roles: Vec<Role>,
}

impl PrincipalSnapshot {
    pub fn full(record: &PrincipalRecord, roles: Vec<Role>) -> Self {
        Self {
            id: record.id,
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            email: record.email.clone(),
            roles,
        }
    }

    pub fn minimal(record: &PrincipalRecord, roles: Vec<Role>) -> Self {
        Self {
            id: record.id,
            first_name: None,
            last_name: None,
            email: record.email.clone(),
            roles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_principal_is_not_valid() {
        assert!(!PrincipalId::from_uuid(Uuid::nil()).is_valid());
        assert!(PrincipalId::new().is_valid());
    }

    #[test]
    fn principal_id_round_trips_through_str() {
        let id = PrincipalId::new();
        let parsed: PrincipalId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<PrincipalId>().is_err());
    }

    #[test]
    fn minimal_snapshot_drops_display_names() {
        let record = PrincipalRecord::new(PrincipalId::new(), "ada@example.com").with_names("Ada", "Lovelace");
        let snapshot = PrincipalSnapshot::minimal(&record, vec![Role::new("viewer")]);
        assert_eq!(snapshot.first_name, None);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("first_name").is_none());
        assert_eq!(json["email"], "ada@example.com");
        assert_eq!(json["roles"][0], "viewer");
    }
}
