use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::jose::{jwe, jws};
use crate::{
    AuthConfig, KeyMaterial, PrincipalId, PrincipalRecord, PrincipalSnapshot, Role, TokenClaims, TokenClass, TokenId,
    TokenIdStrategy, normalize_roles,
};

#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("invalid principal: {0}")]
    InvalidPrincipal(String),

    #[error("invalid token lifetime: {0}")]
    Lifetime(String),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("token encryption failed: {0}")]
    Encryption(String),
}

/// A sealed token together with the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub class: TokenClass,
    pub token: String,
    pub claims: TokenClaims,
}

/// Access and refresh tokens issued from the same instant.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Builds claims and seals them sign-then-encrypt.
pub struct TokenIssuer {
    keys: Arc<KeyMaterial>,
    config: Arc<AuthConfig>,
}

impl TokenIssuer {
    pub fn new(keys: Arc<KeyMaterial>, config: Arc<AuthConfig>) -> Self {
        Self { keys, config }
    }

    pub fn issue(
        &self,
        principal: &PrincipalRecord,
        roles: &[Role],
        class: TokenClass,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, IssuanceError> {
        let claims = self.build_claims(principal, roles, class, now)?;
        let token = self.seal(&claims, class)?;
        tracing::debug!(
            token_id = %claims.jti,
            principal_id = %principal.id,
            class = %class,
            expires_at = %claims.exp,
            "issued token"
        );
        Ok(IssuedToken { class, token, claims })
    }

    /// Issue a bound access/refresh pair from a single `now`.
    pub fn issue_pair(
        &self,
        principal: &PrincipalRecord,
        roles: &[Role],
        now: DateTime<Utc>,
    ) -> Result<TokenPair, IssuanceError> {
        Ok(TokenPair {
            access: self.issue(principal, roles, TokenClass::Access, now)?,
            refresh: self.issue(principal, roles, TokenClass::Refresh, now)?,
        })
    }

    fn build_claims(
        &self,
        principal: &PrincipalRecord,
        roles: &[Role],
        class: TokenClass,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, IssuanceError> {
        if !principal.id.is_valid() {
            return Err(IssuanceError::InvalidPrincipal("nil principal id".into()));
        }
        if principal.email.trim().is_empty() {
            return Err(IssuanceError::InvalidPrincipal("principal has no email".into()));
        }

        let issued_at = DateTime::from_timestamp(now.timestamp(), 0)
            .ok_or_else(|| IssuanceError::Lifetime(format!("timestamp {now} out of range")))?;
        let ttl = chrono::Duration::from_std(self.config.ttl_for(class).effective())
            .map_err(|err| IssuanceError::Lifetime(err.to_string()))?;
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .ok_or_else(|| IssuanceError::Lifetime("expiry overflows".into()))?;

        let roles = normalize_roles(roles.iter().cloned());
        let principal_snapshot = match class {
            TokenClass::Access => PrincipalSnapshot::full(principal, roles),
            TokenClass::Refresh => PrincipalSnapshot::minimal(principal, roles),
        };

        Ok(TokenClaims {
            iss: self.config.issuer.clone(),
            sub: principal.id.to_string(),
            jti: generate_token_id(principal.id, self.config.token_id_strategy),
            iat: issued_at,
            nbf: issued_at,
            exp: expires_at,
            principal: principal_snapshot,
        })
    }

    fn seal(&self, claims: &TokenClaims, class: TokenClass) -> Result<String, IssuanceError> {
        let signed = jws::sign(claims, self.keys.signing_keys(), class.media_type()).map_err(|err| {
            tracing::error!(token_id = %claims.jti, error = %err, "token signing failed");
            IssuanceError::Signing(err.to_string())
        })?;
        jwe::encrypt(signed.as_bytes(), self.keys.encryption_keys(), Some("JWT")).map_err(|err| {
            tracing::error!(token_id = %claims.jti, error = %err, "token encryption failed");
            IssuanceError::Encryption(err.to_string())
        })
    }
}

/// Derive a token identifier for `principal_id`.
pub fn generate_token_id(principal_id: PrincipalId, strategy: TokenIdStrategy) -> TokenId {
    let mut hasher = Sha256::new();
    hasher.update(principal_id.as_uuid().as_bytes());
    if strategy == TokenIdStrategy::PerSession {
        let mut nonce = [0u8; 16];
        OsRng.fill_bytes(&mut nonce);
        hasher.update(nonce);
    }
    TokenId::new(URL_SAFE_NO_PAD.encode(hasher.finalize()))
}
