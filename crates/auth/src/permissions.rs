use serde::Serialize;

use crate::{PrincipalId, Role};

/// A single `(role, resource, action)` question put to the policy engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PolicyRequest {
    pub role: Role,
    pub resource: String,
    pub action: String,
}

impl PolicyRequest {
    pub fn new(role: Role, resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            role,
            resource: resource.into(),
            action: action.into(),
        }
    }
}

/// Outcome of a permission check. Computed per request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionDecision {
    pub principal_id: PrincipalId,
    pub resource: String,
    pub action: String,
    pub granted: bool,

    /// Roles that were evaluated.
    pub roles: Vec<Role>,

    /// First role the policy engine granted, if any.
    pub granted_by: Option<Role>,
}

impl PermissionDecision {
    pub(crate) fn denied(principal_id: PrincipalId, resource: &str, action: &str, roles: Vec<Role>) -> Self {
        Self {
            principal_id,
            resource: resource.to_owned(),
            action: action.to_owned(),
            granted: false,
            roles,
            granted_by: None,
        }
    }
}
