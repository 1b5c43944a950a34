//! Process configuration read from the environment.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use keystone_auth::{AuthConfig, ConfigurationError, TokenIdStrategy};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 10;

/// Everything the API binary needs before it binds a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub auth: AuthConfig,
    /// Directory holding the four JWK files.
    pub key_path: PathBuf,
    pub policy_path: PathBuf,
    /// Shared revocation store and role cache. In-memory when unset.
    pub redis_url: Option<String>,
    /// User and role tables. In-memory when unset.
    pub database_url: Option<String>,
    pub bind_addr: String,
    /// Shortest password `/auth/login` will check against the store.
    pub min_password_length: usize,
    /// Period of the revocation garbage collection. `None` disables it.
    pub purge_interval: Option<Duration>,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let issuer = var("AUTH_ISSUER").unwrap_or_else(|| {
            tracing::warn!("AUTH_ISSUER not set; using 'localhost'");
            "localhost".to_owned()
        });
        let mut auth = AuthConfig::new(issuer);

        if let Some(hours) = parse::<u32>(&var, "JWT_ACCESS_TOKEN_EXPIRATION")? {
            auth.access_ttl = auth.access_ttl.with_requested(HOUR * hours);
        }
        if let Some(hours) = parse::<u32>(&var, "JWT_REFRESH_TOKEN_EXPIRATION")? {
            auth.refresh_ttl = auth.refresh_ttl.with_requested(HOUR * hours);
        }
        if let Some(secs) = parse::<u64>(&var, "REVOCATION_CACHE_TTL_SECS")? {
            auth.revocation_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&var, "ROLE_CACHE_TTL_SECS")? {
            auth.role_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&var, "ROLE_BACKING_TTL_SECS")? {
            auth.role_backing_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse::<u64>(&var, "STORE_TIMEOUT_MS")? {
            auth.store_timeout = Duration::from_millis(ms);
        }
        if let Some(strategy) = var("TOKEN_ID_STRATEGY") {
            auth.token_id_strategy = strategy.parse::<TokenIdStrategy>()?;
        }
        if let Some(required) = parse::<bool>(&var, "REQUIRE_TOKEN_PAIR")? {
            auth.require_token_pair = required;
        }
        auth.validate()?;

        let key_path = var("AUTH_KEY_PATH").map(PathBuf::from).unwrap_or_else(|| {
            tracing::warn!("AUTH_KEY_PATH not set; using ./keys");
            PathBuf::from("keys")
        });
        let policy_path = var("POLICY_PATH").map(PathBuf::from).unwrap_or_else(|| {
            tracing::warn!("POLICY_PATH not set; using ./policy.csv");
            PathBuf::from("policy.csv")
        });

        let redis_url = var("REDIS_URL");
        if redis_url.is_none() {
            tracing::warn!("REDIS_URL not set; revocations will not be shared between instances");
        }
        let database_url = var("DATABASE_URL");
        if database_url.is_none() {
            tracing::warn!("DATABASE_URL not set; using an empty in-memory user store");
        }

        let min_password_length = parse::<usize>(&var, "MIN_PASSWORD_LENGTH")?.unwrap_or(DEFAULT_MIN_PASSWORD_LENGTH);
        let purge_interval = match parse::<u64>(&var, "REVOCATION_PURGE_INTERVAL_SECS")? {
            Some(0) => {
                tracing::warn!("revocation purge disabled; revoked ids will accumulate in the store");
                None
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_PURGE_INTERVAL),
        };

        Ok(Self {
            auth,
            key_path,
            policy_path,
            redis_url,
            database_url,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
            min_password_length,
            purge_interval,
        })
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, ConfigurationError>
where
    T: FromStr,
    T::Err: Display,
{
    var(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ConfigurationError::Invalid(format!("{name}='{raw}': {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ApiConfig, ConfigurationError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ApiConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.auth, AuthConfig::new("localhost"));
        assert_eq!(cfg.key_path, PathBuf::from("keys"));
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert!(cfg.redis_url.is_none());
        assert_eq!(cfg.min_password_length, DEFAULT_MIN_PASSWORD_LENGTH);
        assert_eq!(cfg.purge_interval, Some(DEFAULT_PURGE_INTERVAL));
    }

    #[test]
    fn purge_interval_and_password_length_overrides() {
        let cfg = config(&[("REVOCATION_PURGE_INTERVAL_SECS", "30"), ("MIN_PASSWORD_LENGTH", "12")]).unwrap();
        assert_eq!(cfg.purge_interval, Some(Duration::from_secs(30)));
        assert_eq!(cfg.min_password_length, 12);

        let cfg = config(&[("REVOCATION_PURGE_INTERVAL_SECS", "0")]).unwrap();
        assert_eq!(cfg.purge_interval, None);

        assert!(config(&[("REVOCATION_PURGE_INTERVAL_SECS", "-1")]).is_err());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("AUTH_ISSUER", "auth.example.com"),
            ("JWT_ACCESS_TOKEN_EXPIRATION", "2"),
            ("JWT_REFRESH_TOKEN_EXPIRATION", "48"),
            ("STORE_TIMEOUT_MS", "250"),
            ("TOKEN_ID_STRATEGY", "per-principal"),
            ("REQUIRE_TOKEN_PAIR", "false"),
            ("REDIS_URL", "redis://cache:6379"),
            ("BIND_ADDR", "127.0.0.1:9000"),
        ])
        .unwrap();

        assert_eq!(cfg.auth.issuer, "auth.example.com");
        assert_eq!(cfg.auth.access_ttl.effective(), HOUR * 2);
        // Clamped to the refresh maximum.
        assert_eq!(cfg.auth.refresh_ttl.effective(), HOUR * 12);
        assert_eq!(cfg.auth.store_timeout, Duration::from_millis(250));
        assert_eq!(cfg.auth.token_id_strategy, TokenIdStrategy::PerPrincipal);
        assert!(!cfg.auth.require_token_pair);
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
    }

    #[test]
    fn blank_values_count_as_unset() {
        let cfg = config(&[("AUTH_ISSUER", "  "), ("REDIS_URL", "")]).unwrap();
        assert_eq!(cfg.auth.issuer, "localhost");
        assert!(cfg.redis_url.is_none());
    }

    #[test]
    fn malformed_values_are_fatal() {
        assert!(matches!(
            config(&[("STORE_TIMEOUT_MS", "soon")]),
            Err(ConfigurationError::Invalid(_))
        ));
        assert!(config(&[("STORE_TIMEOUT_MS", "0")]).is_err());
        assert!(config(&[("TOKEN_ID_STRATEGY", "random")]).is_err());
        assert!(config(&[("REQUIRE_TOKEN_PAIR", "maybe")]).is_err());
    }
}
