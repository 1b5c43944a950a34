use keystone_auth::{AuthorizedRequest, PrincipalId, PrincipalSnapshot, Role, TokenClaims};

/// Principal context for a request (verified tokens + the permission decision).
///
/// Inserted by the auth middleware; handlers behind it can rely on it.
#[derive(Debug, Clone)]
pub struct PrincipalContext {
    request: AuthorizedRequest,
}

impl PrincipalContext {
    pub fn new(request: AuthorizedRequest) -> Self {
        Self { request }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.request.access.principal_id
    }

    /// Snapshot carried by the access token.
    pub fn principal(&self) -> &PrincipalSnapshot {
        &self.request.access.claims.principal
    }

    /// Roles resolved for the permission check (not the ones in the token).
    pub fn roles(&self) -> &[Role] {
        &self.request.decision.roles
    }

    pub fn access_claims(&self) -> &TokenClaims {
        &self.request.access.claims
    }

    pub fn refresh_claims(&self) -> Option<&TokenClaims> {
        self.request.refresh.as_ref().map(|t| &t.claims)
    }
}
