//! Signing and encryption key material.
//!
//! Keys are OKP JSON Web Keys (RFC 8037): Ed25519 for signing, X25519 for
//! encryption. They are loaded once at startup, validated and then shared
//! read-only behind an `Arc<KeyMaterial>`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::ConfigurationError;
use crate::jose::{KEY_WRAP_ALGORITHM, SIGNING_ALGORITHM};

/// PKCS#8 v1 prefix for a raw Ed25519 seed (RFC 8410).
const ED25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, // SEQUENCE, 46 bytes
    0x02, 0x01, 0x00, // INTEGER version 0
    0x30, 0x05, // SEQUENCE, algorithm identifier
    0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
    0x04, 0x22, // OCTET STRING, 34 bytes
    0x04, 0x20, // OCTET STRING, 32 bytes
];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    Signing,
    Encryption,
}

impl KeyPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPurpose::Signing => "signing",
            KeyPurpose::Encryption => "encryption",
        }
    }

    pub fn curve(&self) -> &'static str {
        match self {
            KeyPurpose::Signing => "Ed25519",
            KeyPurpose::Encryption => "X25519",
        }
    }

    fn algorithm(&self) -> &'static str {
        match self {
            KeyPurpose::Signing => SIGNING_ALGORITHM,
            KeyPurpose::Encryption => KEY_WRAP_ALGORITHM,
        }
    }

    fn key_use(&self) -> &'static str {
        match self {
            KeyPurpose::Signing => "sig",
            KeyPurpose::Encryption => "enc",
        }
    }

    pub fn public_file(&self) -> String {
        format!("{}-public.json", self.as_str())
    }

    pub fn private_file(&self) -> String {
        format!("{}-private.json", self.as_str())
    }
}

impl core::fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An octet key pair JWK.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl Jwk {
    fn okp(purpose: KeyPurpose, x: &[u8; 32], d: Option<&[u8; 32]>, kid: &str) -> Self {
        Self {
            kty: "OKP".to_owned(),
            crv: purpose.curve().to_owned(),
            x: URL_SAFE_NO_PAD.encode(x),
            d: d.map(|d| URL_SAFE_NO_PAD.encode(d)),
            alg: Some(purpose.algorithm().to_owned()),
            key_use: Some(purpose.key_use().to_owned()),
            kid: Some(kid.to_owned()),
        }
    }

    /// Public half of this key.
    pub fn to_public(&self) -> Self {
        Self { d: None, ..self.clone() }
    }
}

impl core::fmt::Debug for Jwk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("crv", &self.crv)
            .field("x", &self.x)
            .field("d", &self.d.as_ref().map(|_| "<redacted>"))
            .field("kid", &self.kid)
            .finish()
    }
}

/// Public and private JWK of one purpose.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public: Jwk,
    pub private: Jwk,
    pub purpose: KeyPurpose,
}

impl KeyPair {
    /// Check curve, sizes and that the private half derives the public half.
    fn check(&self) -> Result<(Zeroizing<[u8; 32]>, [u8; 32]), ConfigurationError> {
        let purpose = self.purpose;
        for jwk in [&self.public, &self.private] {
            if jwk.kty != "OKP" {
                return Err(invalid(purpose, format!("expected kty OKP, found {}", jwk.kty)));
            }
            if jwk.crv != purpose.curve() {
                return Err(invalid(purpose, format!("expected crv {}, found {}", purpose.curve(), jwk.crv)));
            }
        }
        if self.public.x != self.private.x {
            return Err(invalid(purpose, "public and private files hold different keys"));
        }

        let x = decode_32(purpose, "x", &self.public.x)?;
        let d = match &self.private.d {
            Some(d) => decode_32(purpose, "d", d)?,
            None => return Err(invalid(purpose, "private key has no 'd' component")),
        };

        let derived = match purpose {
            KeyPurpose::Signing => SigningKey::from_bytes(&d).verifying_key().to_bytes(),
            KeyPurpose::Encryption => PublicKey::from(&StaticSecret::from(*d)).to_bytes(),
        };
        if derived != *x {
            return Err(invalid(purpose, "private key does not derive the published public key"));
        }
        Ok((d, *x))
    }
}

/// Ed25519 keys in the forms `jsonwebtoken` consumes.
pub struct SigningKeys {
    pair: KeyPair,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_pair(pair: KeyPair) -> Result<Self, ConfigurationError> {
        let (seed, _) = pair.check()?;

        let mut der = Zeroizing::new(Vec::with_capacity(ED25519_PKCS8_PREFIX.len() + 32));
        der.extend_from_slice(&ED25519_PKCS8_PREFIX);
        der.extend_from_slice(&*seed);
        let encoding = EncodingKey::from_ed_der(&der);
        let decoding = DecodingKey::from_ed_components(&pair.public.x)
            .map_err(|err| invalid(KeyPurpose::Signing, err.to_string()))?;

        Ok(Self { pair, encoding, decoding })
    }

    pub fn pair(&self) -> &KeyPair {
        &self.pair
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

impl core::fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SigningKeys").field("public", &self.pair.public).finish_non_exhaustive()
    }
}

/// X25519 static key pair used for ECDH-ES key agreement.
pub struct EncryptionKeys {
    pair: KeyPair,
    public: PublicKey,
    secret: StaticSecret,
}

impl EncryptionKeys {
    fn from_pair(pair: KeyPair) -> Result<Self, ConfigurationError> {
        let (d, x) = pair.check()?;
        Ok(Self {
            pair,
            public: PublicKey::from(x),
            secret: StaticSecret::from(*d),
        })
    }

    pub fn pair(&self) -> &KeyPair {
        &self.pair
    }

    pub(crate) fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl core::fmt::Debug for EncryptionKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EncryptionKeys").field("public", &self.pair.public).finish_non_exhaustive()
    }
}

/// Both key pairs of the process. Immutable once built.
#[derive(Debug)]
pub struct KeyMaterial {
    signing: SigningKeys,
    encryption: EncryptionKeys,
}

impl KeyMaterial {
    pub fn from_pairs(signing: KeyPair, encryption: KeyPair) -> Result<Self, ConfigurationError> {
        if signing.purpose != KeyPurpose::Signing || encryption.purpose != KeyPurpose::Encryption {
            return Err(ConfigurationError::Invalid("key pairs passed in the wrong order".into()));
        }
        Ok(Self {
            signing: SigningKeys::from_pair(signing)?,
            encryption: EncryptionKeys::from_pair(encryption)?,
        })
    }

    /// Load the four JWK files from `base`.
    pub fn load(base: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let base = base.as_ref();
        let signing = read_pair(base, KeyPurpose::Signing)?;
        let encryption = read_pair(base, KeyPurpose::Encryption)?;
        let material = Self::from_pairs(signing, encryption)?;
        tracing::info!(path = %base.display(), "loaded key material");
        Ok(material)
    }

    /// Fresh random key pairs.
    pub fn generate() -> Result<Self, ConfigurationError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let seed = Zeroizing::new(signing_key.to_bytes());
        let kid = uuid::Uuid::new_v4().to_string();
        let verifying = signing_key.verifying_key().to_bytes();
        let signing = KeyPair {
            public: Jwk::okp(KeyPurpose::Signing, &verifying, None, &kid),
            private: Jwk::okp(KeyPurpose::Signing, &verifying, Some(&seed), &kid),
            purpose: KeyPurpose::Signing,
        };

        let secret = StaticSecret::random_from_rng(OsRng);
        let secret_bytes = Zeroizing::new(secret.to_bytes());
        let public = PublicKey::from(&secret).to_bytes();
        let kid = uuid::Uuid::new_v4().to_string();
        let encryption = KeyPair {
            public: Jwk::okp(KeyPurpose::Encryption, &public, None, &kid),
            private: Jwk::okp(KeyPurpose::Encryption, &public, Some(&secret_bytes), &kid),
            purpose: KeyPurpose::Encryption,
        };

        Self::from_pairs(signing, encryption)
    }

    /// Persist the four JWK files into `dir`, creating it when missing.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<(), ConfigurationError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| ConfigurationError::KeyWrite {
            path: dir.to_path_buf(),
            source,
        })?;

        for pair in [self.signing.pair(), self.encryption.pair()] {
            write_jwk(&dir.join(pair.purpose.public_file()), &pair.public, false)?;
            write_jwk(&dir.join(pair.purpose.private_file()), &pair.private, true)?;
        }
        Ok(())
    }

    pub fn signing_keys(&self) -> &SigningKeys {
        &self.signing
    }

    pub fn encryption_keys(&self) -> &EncryptionKeys {
        &self.encryption
    }
}

fn read_pair(base: &Path, purpose: KeyPurpose) -> Result<KeyPair, ConfigurationError> {
    Ok(KeyPair {
        public: read_jwk(&base.join(purpose.public_file()))?,
        private: read_jwk(&base.join(purpose.private_file()))?,
        purpose,
    })
}

fn read_jwk(path: &Path) -> Result<Jwk, ConfigurationError> {
    let bytes = Zeroizing::new(fs::read(path).map_err(|source| ConfigurationError::KeyRead {
        path: path.to_path_buf(),
        source,
    })?);
    serde_json::from_slice(&bytes).map_err(|err| ConfigurationError::KeyDecode {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn write_jwk(path: &Path, jwk: &Jwk, private: bool) -> Result<(), ConfigurationError> {
    let write_err = |source| ConfigurationError::KeyWrite {
        path: path.to_path_buf(),
        source,
    };
    let json = Zeroizing::new(
        serde_json::to_vec_pretty(jwk).map_err(|err| write_err(std::io::Error::other(err)))?,
    );

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(write_err)?;

    // `mode` only applies on create; tighten an existing file before the
    // private component lands in it.
    #[cfg(unix)]
    if private {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600)).map_err(write_err)?;
    }
    #[cfg(not(unix))]
    let _ = private;

    file.write_all(&json).map_err(write_err)?;
    file.sync_all().map_err(write_err)
}

fn decode_32(purpose: KeyPurpose, field: &str, value: &str) -> Result<Zeroizing<[u8; 32]>, ConfigurationError> {
    let bytes = Zeroizing::new(
        URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|err| invalid(purpose, format!("'{field}' is not base64url: {err}")))?,
    );
    if bytes.len() != 32 {
        return Err(invalid(purpose, format!("'{field}' must be 32 bytes, found {}", bytes.len())));
    }
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn invalid(purpose: KeyPurpose, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidKey {
        purpose: purpose.as_str(),
        reason: reason.into(),
    }
}
