use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    PermissionDecision, RoleResolver, StoreError, TokenClass, TokenVerifier, VerificationError, VerifiedToken,
};

/// Raw credentials as presented by a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Credentials<'a> {
    /// Bearer (access) token.
    pub bearer: Option<&'a str>,

    /// Refresh token bound to the bearer token.
    pub refresh: Option<&'a str>,
}

impl<'a> Credentials<'a> {
    pub fn bearer(token: &'a str) -> Self {
        Self {
            bearer: Some(token),
            refresh: None,
        }
    }

    pub fn with_refresh(mut self, token: &'a str) -> Self {
        self.refresh = Some(token);
        self
    }
}

/// A request that passed verification and the permission check.
#[derive(Debug, Clone)]
pub struct AuthorizedRequest {
    pub access: VerifiedToken,
    pub refresh: Option<VerifiedToken>,
    pub decision: PermissionDecision,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("invalid token: {0}")]
    InvalidToken(VerificationError),

    #[error("forbidden: {action} {resource}")]
    Forbidden { resource: String, action: String },

    #[error("authorization backend unavailable: {0}")]
    Unavailable(StoreError),
}

impl AuthzError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthzError::Unavailable(_))
    }
}

impl From<VerificationError> for AuthzError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::StoreUnavailable(store) => AuthzError::Unavailable(store),
            other => AuthzError::InvalidToken(other),
        }
    }
}

/// Per-request orchestration of the verifier and the resolver.
///
/// - No transport types
/// - Protected logic is reachable only through `Ok`
pub struct Authorizer {
    verifier: Arc<TokenVerifier>,
    resolver: Arc<RoleResolver>,
    require_token_pair: bool,
}

impl Authorizer {
    pub fn new(verifier: Arc<TokenVerifier>, resolver: Arc<RoleResolver>) -> Self {
        let require_token_pair = verifier.config().require_token_pair;
        Self {
            verifier,
            resolver,
            require_token_pair,
        }
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    /// Verify the presented credentials without a permission check.
    pub async fn authenticate(
        &self,
        credentials: Credentials<'_>,
        now: DateTime<Utc>,
    ) -> Result<(VerifiedToken, Option<VerifiedToken>), AuthzError> {
        let bearer = credentials.bearer.ok_or(VerificationError::MissingToken)?;

        match credentials.refresh {
            Some(refresh) => {
                let pair = self.verifier.verify_pair(bearer, refresh, now).await?;
                Ok((pair.access, Some(pair.refresh)))
            }
            None if self.require_token_pair => Err(AuthzError::InvalidToken(VerificationError::MissingToken)),
            None => Ok((self.verifier.verify(bearer, TokenClass::Access, now).await?, None)),
        }
    }

    /// Verify the credentials, then require that some role of the principal
    /// grants `(resource, action)`.
    pub async fn authorize(
        &self,
        credentials: Credentials<'_>,
        resource: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthorizedRequest, AuthzError> {
        let (access, refresh) = self.authenticate(credentials, now).await?;

        let decision = self
            .resolver
            .check_permission(access.principal_id, resource, action)
            .await
            .map_err(AuthzError::Unavailable)?;

        if !decision.granted {
            tracing::warn!(
                principal_id = %access.principal_id,
                resource,
                action,
                roles = ?decision.roles,
                "permission denied"
            );
            return Err(AuthzError::Forbidden {
                resource: resource.to_owned(),
                action: action.to_owned(),
            });
        }

        tracing::debug!(
            principal_id = %access.principal_id,
            resource,
            action,
            granted_by = ?decision.granted_by,
            "request authorized"
        );
        Ok(AuthorizedRequest {
            access,
            refresh,
            decision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FlakyRevocationStore, MemoryRevocationStore, StaticDirectory, StaticPolicy, StaticRoleStore};
    use crate::{
        AuthConfig, KeyMaterial, PrincipalId, PrincipalRecord, RevocationRegistry, RevocationStore, Role, RoleStore,
        TokenIssuer,
    };
    use chrono::Duration;

    struct Setup {
        issuer: TokenIssuer,
        authorizer: Authorizer,
        user: PrincipalRecord,
    }

    fn setup(require_pair: bool, revocations: Arc<dyn RevocationStore>, roles: Arc<dyn RoleStore>, user: PrincipalRecord) -> Setup {
        let keys = Arc::new(KeyMaterial::generate().unwrap());
        let mut config = AuthConfig::new("auth.example.com");
        config.require_token_pair = require_pair;
        config.store_timeout = std::time::Duration::from_millis(200);
        let config = Arc::new(config);

        let registry = Arc::new(RevocationRegistry::from_config(revocations, &config));
        let directory = Arc::new(StaticDirectory::default().with(user.clone()));
        let verifier = Arc::new(TokenVerifier::new(keys.clone(), config.clone(), registry, directory));
        let policy = Arc::new(StaticPolicy::default().grant("viewer", "/reports", "GET"));
        let resolver = Arc::new(RoleResolver::new(roles, policy, &config));

        Setup {
            issuer: TokenIssuer::new(keys, config),
            authorizer: Authorizer::new(verifier, resolver),
            user,
        }
    }

    fn viewer_setup(require_pair: bool) -> Setup {
        let user = PrincipalRecord::new(PrincipalId::new(), "u1@example.com");
        let roles = Arc::new(StaticRoleStore::default().with(user.id, &["viewer"]));
        setup(require_pair, Arc::new(MemoryRevocationStore::default()), roles, user)
    }

    #[tokio::test]
    async fn granted_request_with_bound_pair() {
        let s = viewer_setup(true);
        let now = Utc::now();
        let pair = s.issuer.issue_pair(&s.user, &[Role::new("viewer")], now).unwrap();
        let creds = Credentials::bearer(&pair.access.token).with_refresh(&pair.refresh.token);

        let ok = s.authorizer.authorize(creds, "/reports", "GET", now).await.unwrap();
        assert_eq!(ok.access.principal_id, s.user.id);
        assert!(ok.refresh.is_some());
        assert_eq!(ok.decision.granted_by, Some(Role::new("viewer")));
    }

    #[tokio::test]
    async fn missing_refresh_is_rejected_when_pair_required() {
        let s = viewer_setup(true);
        let now = Utc::now();
        let pair = s.issuer.issue_pair(&s.user, &[], now).unwrap();

        let err = s
            .authorizer
            .authorize(Credentials::bearer(&pair.access.token), "/reports", "GET", now)
            .await
            .unwrap_err();
        assert_eq!(err, AuthzError::InvalidToken(VerificationError::MissingToken));
    }

    #[tokio::test]
    async fn access_token_alone_suffices_when_pair_optional() {
        let s = viewer_setup(false);
        let now = Utc::now();
        let access = s.issuer.issue(&s.user, &[], TokenClass::Access, now).unwrap();

        let ok = s
            .authorizer
            .authorize(Credentials::bearer(&access.token), "/reports", "GET", now)
            .await
            .unwrap();
        assert!(ok.refresh.is_none());
    }

    #[tokio::test]
    async fn denied_permission_is_forbidden() {
        let s = viewer_setup(false);
        let now = Utc::now();
        let access = s.issuer.issue(&s.user, &[], TokenClass::Access, now).unwrap();

        let err = s
            .authorizer
            .authorize(Credentials::bearer(&access.token), "/reports", "DELETE", now)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Forbidden { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_or_expired_bearer_is_invalid_token() {
        let s = viewer_setup(false);
        let now = Utc::now();
        assert_eq!(
            s.authorizer.authorize(Credentials::default(), "/reports", "GET", now).await.unwrap_err(),
            AuthzError::InvalidToken(VerificationError::MissingToken)
        );

        let access = s.issuer.issue(&s.user, &[], TokenClass::Access, now).unwrap();
        let err = s
            .authorizer
            .authorize(Credentials::bearer(&access.token), "/reports", "GET", now + Duration::hours(3))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidToken(VerificationError::ClaimInvalid(_))));
    }

    #[tokio::test]
    async fn outages_are_retryable() {
        let user = PrincipalRecord::new(PrincipalId::new(), "u1@example.com");
        let roles = Arc::new(StaticRoleStore::default().with(user.id, &["viewer"]));
        let s = setup(false, Arc::new(FlakyRevocationStore::failing()), roles, user);
        let now = Utc::now();
        let access = s.issuer.issue(&s.user, &[], TokenClass::Access, now).unwrap();
        let err = s
            .authorizer
            .authorize(Credentials::bearer(&access.token), "/reports", "GET", now)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let user = PrincipalRecord::new(PrincipalId::new(), "u1@example.com");
        let s = setup(
            false,
            Arc::new(MemoryRevocationStore::default()),
            Arc::new(StaticRoleStore::failing()),
            user,
        );
        let access = s.issuer.issue(&s.user, &[], TokenClass::Access, now).unwrap();
        let err = s
            .authorizer
            .authorize(Credentials::bearer(&access.token), "/reports", "GET", now)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Unavailable(StoreError::Unavailable(_))));
    }
}
