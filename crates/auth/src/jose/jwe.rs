//! JWE compact serialization with `ECDH-ES+A256KW` over X25519 and `A256GCM`
//! content encryption (RFC 7516, RFC 7518 §4.6, RFC 8037).

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use aes_kw::KekAes256;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use super::{CONTENT_ENCRYPTION, JoseError, KEY_WRAP_ALGORITHM, decode_header_segment, header_str};
use crate::EncryptionKeys;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const WRAPPED_KEY_LEN: usize = 40;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EphemeralKey {
    kty: String,
    crv: String,
    x: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProtectedHeader {
    alg: String,
    enc: String,
    epk: EphemeralKey,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    apu: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    apv: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    cty: Option<String>,
}

/// Encrypt `plaintext` to the recipient's X25519 public key.
pub fn encrypt(plaintext: &[u8], keys: &EncryptionKeys, content_type: Option<&str>) -> Result<String, JoseError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(keys.public_key());
    if !shared.was_contributory() {
        return Err(JoseError::Crypto("non-contributory key agreement".into()));
    }
    let kek = concat_kdf(shared.as_bytes(), KEY_WRAP_ALGORITHM, &[], &[]);

    let mut cek = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(&mut *cek);
    let mut wrapped = [0u8; WRAPPED_KEY_LEN];
    KekAes256::from(*kek)
        .wrap(&*cek, &mut wrapped)
        .map_err(|_| JoseError::Crypto("content key wrapping failed".into()))?;

    let header = ProtectedHeader {
        alg: KEY_WRAP_ALGORITHM.to_owned(),
        enc: CONTENT_ENCRYPTION.to_owned(),
        epk: EphemeralKey {
            kty: "OKP".to_owned(),
            crv: "X25519".to_owned(),
            x: URL_SAFE_NO_PAD.encode(ephemeral_public.as_bytes()),
        },
        apu: None,
        apv: None,
        typ: Some("JWE".to_owned()),
        cty: content_type.map(str::to_owned),
    };
    let header_json = serde_json::to_vec(&header).map_err(|err| JoseError::Crypto(err.to_string()))?;
    let header_b64 = URL_SAFE_NO_PAD.encode(header_json);

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let cipher = Aes256Gcm::new_from_slice(&*cek).map_err(|_| JoseError::Crypto("invalid content key".into()))?;
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: header_b64.as_bytes(),
            },
        )
        .map_err(|_| JoseError::Crypto("content encryption failed".into()))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    Ok(format!(
        "{header_b64}.{}.{}.{}.{}",
        URL_SAFE_NO_PAD.encode(wrapped),
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag),
    ))
}

/// Decrypt a compact JWE addressed to `keys`.
///
/// Header algorithms are checked before any key agreement happens.
pub fn decrypt(token: &str, keys: &EncryptionKeys) -> Result<Vec<u8>, JoseError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 5 {
        return Err(JoseError::Malformed(format!("expected 5 segments, found {}", segments.len())));
    }

    let raw_header = decode_header_segment(segments[0])?;
    check_algorithms(&raw_header)?;
    let header: ProtectedHeader =
        serde_json::from_value(raw_header).map_err(|err| JoseError::Malformed(format!("protected header: {err}")))?;
    if header.epk.kty != "OKP" || header.epk.crv != "X25519" {
        return Err(JoseError::UnsupportedAlgorithm(format!(
            "ephemeral key {}/{}",
            header.epk.kty, header.epk.crv
        )));
    }

    let epk = decode_segment("epk.x", &header.epk.x)?;
    let epk: [u8; 32] = epk
        .as_slice()
        .try_into()
        .map_err(|_| JoseError::Malformed("ephemeral key must be 32 bytes".into()))?;
    let shared = keys.secret().diffie_hellman(&PublicKey::from(epk));
    if !shared.was_contributory() {
        return Err(JoseError::DecryptionFailed);
    }

    let apu = header.apu.as_deref().map(|v| decode_segment("apu", v)).transpose()?.unwrap_or_default();
    let apv = header.apv.as_deref().map(|v| decode_segment("apv", v)).transpose()?.unwrap_or_default();
    let kek = concat_kdf(shared.as_bytes(), KEY_WRAP_ALGORITHM, &apu, &apv);

    let wrapped = decode_segment("encrypted key", segments[1])?;
    if wrapped.len() != WRAPPED_KEY_LEN {
        return Err(JoseError::DecryptionFailed);
    }
    let mut cek = Zeroizing::new([0u8; 32]);
    KekAes256::from(*kek)
        .unwrap(&wrapped, &mut *cek)
        .map_err(|_| JoseError::DecryptionFailed)?;

    let iv = decode_segment("iv", segments[2])?;
    if iv.len() != IV_LEN {
        return Err(JoseError::Malformed(format!("iv must be {IV_LEN} bytes")));
    }
    let mut sealed = decode_segment("ciphertext", segments[3])?;
    let tag = decode_segment("tag", segments[4])?;
    if tag.len() != TAG_LEN {
        return Err(JoseError::Malformed(format!("tag must be {TAG_LEN} bytes")));
    }
    sealed.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new_from_slice(&*cek).map_err(|_| JoseError::DecryptionFailed)?;
    cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &sealed,
                aad: segments[0].as_bytes(),
            },
        )
        .map_err(|_| JoseError::DecryptionFailed)
}

fn check_algorithms(header: &serde_json::Value) -> Result<(), JoseError> {
    match header_str(header, "alg") {
        Some(KEY_WRAP_ALGORITHM) => {}
        Some(other) => return Err(JoseError::UnsupportedAlgorithm(other.to_owned())),
        None => return Err(JoseError::UnsupportedAlgorithm("<missing alg>".into())),
    }
    match header_str(header, "enc") {
        Some(CONTENT_ENCRYPTION) => {}
        Some(other) => return Err(JoseError::UnsupportedAlgorithm(other.to_owned())),
        None => return Err(JoseError::UnsupportedAlgorithm("<missing enc>".into())),
    }
    if header.get("zip").is_some() {
        return Err(JoseError::UnsupportedAlgorithm("zip".into()));
    }
    if header.get("crit").is_some() {
        return Err(JoseError::UnsupportedAlgorithm("crit".into()));
    }
    Ok(())
}

fn decode_segment(name: &str, value: &str) -> Result<Vec<u8>, JoseError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|err| JoseError::Malformed(format!("{name} is not base64url: {err}")))
}

/// Single-round Concat KDF (NIST SP 800-56A) as profiled by RFC 7518 §4.6.2,
/// producing a 256-bit key.
fn concat_kdf(z: &[u8], algorithm: &str, apu: &[u8], apv: &[u8]) -> Zeroizing<[u8; 32]> {
    derive_key(z, algorithm, apu, apv, 256)
}

fn derive_key(z: &[u8], algorithm: &str, apu: &[u8], apv: &[u8], key_bits: u32) -> Zeroizing<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(1u32.to_be_bytes());
    hasher.update(z);
    for field in [algorithm.as_bytes(), apu, apv] {
        hasher.update((field.len() as u32).to_be_bytes());
        hasher.update(field);
    }
    hasher.update(key_bits.to_be_bytes());

    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&hasher.finalize());
    out
}
