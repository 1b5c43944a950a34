//! Compact JOSE envelopes: an EdDSA JWS nested inside an
//! `ECDH-ES+A256KW` / `A256GCM` JWE.

pub mod jwe;
pub mod jws;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

pub const SIGNING_ALGORITHM: &str = "EdDSA";
pub const KEY_WRAP_ALGORITHM: &str = "ECDH-ES+A256KW";
pub const CONTENT_ENCRYPTION: &str = "A256GCM";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JoseError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("bad signature")]
    BadSignature,

    #[error("malformed claims: {0}")]
    Claims(String),

    #[error("unexpected token type: {0}")]
    UnexpectedType(String),

    #[error("cryptographic failure: {0}")]
    Crypto(String),
}

/// Decode the JSON header segment of a compact serialization.
pub(crate) fn decode_header_segment(segment: &str) -> Result<serde_json::Value, JoseError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|err| JoseError::Malformed(format!("header is not base64url: {err}")))?;
    let header: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|err| JoseError::Malformed(format!("header is not JSON: {err}")))?;
    if !header.is_object() {
        return Err(JoseError::Malformed("header is not a JSON object".into()));
    }
    Ok(header)
}

pub(crate) fn header_str<'a>(header: &'a serde_json::Value, name: &str) -> Option<&'a str> {
    header.get(name).and_then(|v| v.as_str())
}
