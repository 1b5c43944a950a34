//! Argon2id password hashes in PHC string format
//! (`$argon2id$v=19$m=..,t=..,p=..$salt$hash`).

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

const SALT_LENGTH: usize = 16;
const OUTPUT_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("invalid argon2 cost: {0}")]
    Cost(String),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Argon2id work factors used for new hashes. Verification always uses the
/// factors recorded in the stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 4,
            parallelism: 4,
        }
    }
}

impl HashCost {
    fn params(self) -> Result<Params, PasswordError> {
        Params::new(self.memory_kib, self.iterations, self.parallelism, Some(OUTPUT_LENGTH))
            .map_err(|err| PasswordError::Cost(err.to_string()))
    }
}

/// Hash `password` with a fresh random salt.
pub fn hash_password(password: &str, cost: HashCost) -> Result<String, PasswordError> {
    let mut salt = [0u8; SALT_LENGTH];
    OsRng.fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(|err| PasswordError::Hash(err.to_string()))?;

    let hash = Argon2::new(Algorithm::Argon2id, Version::V0x13, cost.params()?)
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| PasswordError::Hash(err.to_string()))?;
    Ok(hash.to_string())
}

/// Constant-time check of `password` against a stored hash. A malformed hash
/// never matches.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(err) => {
            tracing::warn!(error = %err, "stored password hash is malformed");
            false
        }
    }
}

/// [`verify_password`] on the blocking pool; argon2 is too slow for a
/// runtime worker.
pub async fn verify_password_blocking(password: &str, stored: String) -> bool {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "password verification task failed");
            false
        })
}
