use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC.
///
/// Roles are opaque strings at this layer; what a role may do is decided by
/// the policy engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Role {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Trim role names, drop empty ones, then sort and de-duplicate.
pub fn normalize_roles<I>(roles: I) -> Vec<Role>
where
    I: IntoIterator<Item = Role>,
{
    let mut out: Vec<Role> = roles
        .into_iter()
        .filter_map(|role| {
            let trimmed = role.as_str().trim();
            if trimmed.is_empty() {
                None
            } else if trimmed.len() == role.as_str().len() {
                Some(role)
            } else {
                Some(Role::new(trimmed.to_owned()))
            }
        })
        .collect();
    out.sort();
    out.dedup();
    out
}
