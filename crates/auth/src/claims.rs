use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{PrincipalId, PrincipalSnapshot};

/// Which half of a token pair a token is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenClass {
    Access,
    Refresh,
}

impl TokenClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenClass::Access => "access",
            TokenClass::Refresh => "refresh",
        }
    }

    /// `typ` header of the signed token; keeps one class from passing as the other.
    pub fn media_type(&self) -> &'static str {
        match self {
            TokenClass::Access => "at+jwt",
            TokenClass::Refresh => "rt+jwt",
        }
    }
}

impl core::fmt::Display for TokenClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "access" => Ok(TokenClass::Access),
            "refresh" => Ok(TokenClass::Refresh),
            other => Err(format!("unknown token class '{other}'")),
        }
    }
}

/// Opaque token identifier (`jti`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl core::fmt::Display for TokenId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Claims carried inside the signed envelope.
///
/// Timestamps travel as NumericDate (whole unix seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,

    /// Principal identifier as a string; must equal `principal.id`.
    pub sub: String,

    pub jti: TokenId,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub nbf: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,

    pub principal: PrincipalSnapshot,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("malformed claims: {0}")]
    Malformed(String),

    #[error("token is not of class {0}")]
    WrongClass(TokenClass),

    #[error("invalid time window (iat <= nbf < exp required)")]
    InvalidTimeWindow,

    #[error("issuer mismatch")]
    IssuerMismatch,

    #[error("subject is not a valid principal id")]
    MalformedSubject,

    #[error("subject does not match embedded principal")]
    SubjectMismatch,

    #[error("missing token id")]
    MissingTokenId,

    #[error("token issued in the future")]
    IssuedInFuture,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("token has expired")]
    Expired,
}

/// Validate decoded claims against the expected issuer and `now`.
///
/// Checks run in a fixed order and the first failure wins. On success the
/// parsed subject is returned.
pub fn validate_claims(
    claims: &TokenClaims,
    expected_issuer: &str,
    now: DateTime<Utc>,
) -> Result<PrincipalId, ClaimError> {
    if claims.nbf < claims.iat || claims.exp <= claims.nbf {
        return Err(ClaimError::InvalidTimeWindow);
    }
    if claims.iss != expected_issuer {
        return Err(ClaimError::IssuerMismatch);
    }

    let subject = PrincipalId::from_str(&claims.sub).map_err(|_| ClaimError::MalformedSubject)?;
    if !subject.is_valid() {
        return Err(ClaimError::MalformedSubject);
    }
    if subject != claims.principal.id {
        return Err(ClaimError::SubjectMismatch);
    }

    if claims.jti.is_empty() {
        return Err(ClaimError::MissingTokenId);
    }
    if now < claims.iat {
        return Err(ClaimError::IssuedInFuture);
    }
    if now < claims.nbf {
        return Err(ClaimError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(ClaimError::Expired);
    }
    Ok(subject)
}
