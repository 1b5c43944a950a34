use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::bounded;
use crate::jose::{JoseError, jwe, jws};
use crate::{
    AuthConfig, ClaimError, KeyMaterial, PrincipalDirectory, PrincipalId, RevocationRegistry, StoreError, TokenClaims,
    TokenClass, validate_claims,
};

/// Message shown to clients for every verification rejection.
pub const INVALID_TOKEN_MESSAGE: &str = "Invalid or expired access token.";

/// Stages a token moves through. A rejection can happen in any of them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VerificationState {
    Received,
    Decrypted,
    SignatureVerified,
    ClaimsValidated,
    Authorized,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("no token presented")]
    MissingToken,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("bad signature")]
    BadSignature,

    #[error("invalid claim: {0}")]
    ClaimInvalid(#[from] ClaimError),

    #[error("token revoked")]
    Revoked,

    #[error("token pair mismatch: {0}")]
    PairMismatch(String),

    #[error("principal is not an active account")]
    UserInactive,

    #[error("revocation store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl VerificationError {
    /// Only store outages are worth retrying; every other rejection is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VerificationError::StoreUnavailable(_))
    }

    /// Last state the token reached before this rejection.
    pub fn stage(&self) -> VerificationState {
        match self {
            VerificationError::MissingToken
            | VerificationError::UnsupportedAlgorithm(_)
            | VerificationError::DecryptionFailed => VerificationState::Received,
            VerificationError::BadSignature => VerificationState::Decrypted,
            VerificationError::ClaimInvalid(_) => VerificationState::SignatureVerified,
            VerificationError::Revoked
            | VerificationError::PairMismatch(_)
            | VerificationError::UserInactive
            | VerificationError::StoreUnavailable(_) => VerificationState::ClaimsValidated,
        }
    }

    /// What a client is told. Reasons stay in the logs.
    pub fn public_message(&self) -> &'static str {
        INVALID_TOKEN_MESSAGE
    }
}

/// A token that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub class: TokenClass,
    pub principal_id: PrincipalId,
    pub claims: TokenClaims,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPair {
    pub access: VerifiedToken,
    pub refresh: VerifiedToken,
}

/// Decrypts, verifies and validates tokens, then consults the revocation
/// registry and the principal directory. Never retries.
pub struct TokenVerifier {
    keys: Arc<KeyMaterial>,
    config: Arc<AuthConfig>,
    revocations: Arc<RevocationRegistry>,
    directory: Arc<dyn PrincipalDirectory>,
    timeout: Duration,
}

impl TokenVerifier {
    pub fn new(
        keys: Arc<KeyMaterial>,
        config: Arc<AuthConfig>,
        revocations: Arc<RevocationRegistry>,
        directory: Arc<dyn PrincipalDirectory>,
    ) -> Self {
        let timeout = config.store_timeout;
        Self {
            keys,
            config,
            revocations,
            directory,
            timeout,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Verify a single token of `class`.
    pub async fn verify(
        &self,
        token: &str,
        class: TokenClass,
        now: DateTime<Utc>,
    ) -> Result<VerifiedToken, VerificationError> {
        let outcome = self.verify_single(token, class, now).await;
        log_outcome(class, &outcome);
        outcome
    }

    /// Verify an access token together with the refresh token it was issued
    /// alongside.
    pub async fn verify_pair(
        &self,
        access: &str,
        refresh: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedPair, VerificationError> {
        let outcome = self.verify_bound_pair(access, refresh, now).await;
        log_outcome(TokenClass::Access, &outcome);
        outcome
    }

    async fn verify_single(
        &self,
        token: &str,
        class: TokenClass,
        now: DateTime<Utc>,
    ) -> Result<VerifiedToken, VerificationError> {
        let verified = self.verify_unbound(token, class, now).await?;
        self.ensure_active(&verified).await?;
        Ok(verified)
    }

    async fn verify_bound_pair(
        &self,
        access: &str,
        refresh: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedPair, VerificationError> {
        let access = self.verify_unbound(access, TokenClass::Access, now).await?;
        let refresh = self.verify_unbound(refresh, TokenClass::Refresh, now).await?;
        check_pair_binding(&access.claims, &refresh.claims)?;
        self.ensure_active(&access).await?;
        Ok(VerifiedPair { access, refresh })
    }

    /// Steps up to and including the revocation check.
    async fn verify_unbound(
        &self,
        token: &str,
        class: TokenClass,
        now: DateTime<Utc>,
    ) -> Result<VerifiedToken, VerificationError> {
        if token.trim().is_empty() {
            return Err(VerificationError::MissingToken);
        }

        let signed = jwe::decrypt(token, self.keys.encryption_keys()).map_err(|err| match err {
            JoseError::UnsupportedAlgorithm(alg) => VerificationError::UnsupportedAlgorithm(alg),
            _ => VerificationError::DecryptionFailed,
        })?;
        advance(class, VerificationState::Decrypted);

        let signed = String::from_utf8(signed).map_err(|_| VerificationError::BadSignature)?;
        let claims: TokenClaims =
            jws::verify(&signed, self.keys.signing_keys(), class.media_type()).map_err(|err| match err {
                JoseError::UnsupportedAlgorithm(alg) => VerificationError::UnsupportedAlgorithm(alg),
                JoseError::Claims(reason) => VerificationError::ClaimInvalid(ClaimError::Malformed(reason)),
                JoseError::UnexpectedType(_) => VerificationError::ClaimInvalid(ClaimError::WrongClass(class)),
                _ => VerificationError::BadSignature,
            })?;
        advance(class, VerificationState::SignatureVerified);

        let principal_id = validate_claims(&claims, &self.config.issuer, now)?;
        advance(class, VerificationState::ClaimsValidated);

        if self.revocations.is_revoked(&claims.jti, class).await? {
            return Err(VerificationError::Revoked);
        }

        Ok(VerifiedToken {
            class,
            principal_id,
            claims,
        })
    }

    async fn ensure_active(&self, token: &VerifiedToken) -> Result<(), VerificationError> {
        let email = &token.claims.principal.email;
        match bounded(self.timeout, self.directory.is_active(token.principal_id, email)).await {
            Ok(true) => {
                advance(token.class, VerificationState::Authorized);
                Ok(())
            }
            Ok(false) => Err(VerificationError::UserInactive),
            Err(err) => {
                tracing::warn!(principal_id = %token.principal_id, error = %err, "principal directory unavailable");
                Err(VerificationError::UserInactive)
            }
        }
    }
}

/// A refresh token is bound to an access token when both name the same
/// subject and none of its timestamps precede the access token's.
pub fn check_pair_binding(access: &TokenClaims, refresh: &TokenClaims) -> Result<(), VerificationError> {
    if access.sub != refresh.sub {
        return Err(VerificationError::PairMismatch("subjects differ".into()));
    }
    if refresh.iat < access.iat {
        return Err(VerificationError::PairMismatch("refresh token issued before access token".into()));
    }
    if refresh.nbf < access.nbf {
        return Err(VerificationError::PairMismatch("refresh token valid before access token".into()));
    }
    if refresh.exp < access.exp {
        return Err(VerificationError::PairMismatch("refresh token expires before access token".into()));
    }
    Ok(())
}

fn advance(class: TokenClass, state: VerificationState) {
    tracing::debug!(class = %class, state = ?state, "token verification advanced");
}

fn log_outcome<T>(class: TokenClass, outcome: &Result<T, VerificationError>) {
    match outcome {
        Ok(_) => {}
        Err(err @ VerificationError::StoreUnavailable(_)) => {
            tracing::error!(class = %class, stage = ?err.stage(), reason = %err, "token verification failed")
        }
        Err(err) => {
            tracing::warn!(class = %class, stage = ?err.stage(), reason = %err, "token rejected")
        }
    }
}
