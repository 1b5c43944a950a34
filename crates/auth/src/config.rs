use core::str::FromStr;
use std::time::Duration;

use crate::{ConfigurationError, TokenClass};

const HOUR: Duration = Duration::from_secs(60 * 60);

/// Lifetime bounds for one token class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub min: Duration,
    pub requested: Duration,
    pub max: Duration,
}

impl TtlPolicy {
    pub const fn new(min: Duration, requested: Duration, max: Duration) -> Self {
        Self { min, requested, max }
    }

    pub const fn access_default() -> Self {
        Self::new(HOUR, HOUR, Duration::from_secs(2 * 60 * 60))
    }

    pub const fn refresh_default() -> Self {
        Self::new(HOUR, Duration::from_secs(6 * 60 * 60), Duration::from_secs(12 * 60 * 60))
    }

    pub fn with_requested(mut self, requested: Duration) -> Self {
        self.requested = requested;
        self
    }

    /// The requested lifetime, silently clamped into `[min, max]`.
    pub fn effective(&self) -> Duration {
        if self.requested < self.min {
            self.min
        } else if self.requested > self.max {
            self.max
        } else {
            self.requested
        }
    }
}

/// How token identifiers are derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenIdStrategy {
    /// SHA-256 over the principal id and 16 random bytes; unique per issuance.
    #[default]
    PerSession,

    /// SHA-256 over the principal id alone; revoking one token revokes every
    /// token of that principal and class.
    PerPrincipal,
}

impl FromStr for TokenIdStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_session" | "session" => Ok(TokenIdStrategy::PerSession),
            "per_principal" | "principal" => Ok(TokenIdStrategy::PerPrincipal),
            other => Err(ConfigurationError::Invalid(format!("unknown token id strategy '{other}'"))),
        }
    }
}

/// Runtime settings of the auth core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Canonical issuer domain; verified tokens must carry it exactly.
    pub issuer: String,
    pub access_ttl: TtlPolicy,
    pub refresh_ttl: TtlPolicy,
    pub revocation_cache_ttl: Duration,
    pub role_cache_ttl: Duration,
    pub role_backing_ttl: Duration,
    pub store_timeout: Duration,
    pub token_id_strategy: TokenIdStrategy,
    pub require_token_pair: bool,
}

impl AuthConfig {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            access_ttl: TtlPolicy::access_default(),
            refresh_ttl: TtlPolicy::refresh_default(),
            revocation_cache_ttl: Duration::from_secs(5 * 60),
            role_cache_ttl: Duration::from_secs(5 * 60),
            role_backing_ttl: Duration::from_secs(24 * 60 * 60),
            store_timeout: Duration::from_secs(2),
            token_id_strategy: TokenIdStrategy::default(),
            require_token_pair: true,
        }
    }

    pub fn ttl_for(&self, class: TokenClass) -> &TtlPolicy {
        match class {
            TokenClass::Access => &self.access_ttl,
            TokenClass::Refresh => &self.refresh_ttl,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigurationError::Invalid("issuer must not be empty".into()));
        }

        for (name, ttl) in [("access", &self.access_ttl), ("refresh", &self.refresh_ttl)] {
            if ttl.min.is_zero() {
                return Err(ConfigurationError::Invalid(format!("{name} ttl minimum must be positive")));
            }
            if ttl.min > ttl.max {
                return Err(ConfigurationError::Invalid(format!(
                    "{name} ttl minimum {:?} exceeds maximum {:?}",
                    ttl.min, ttl.max
                )));
            }
        }
        if self.refresh_ttl.max < self.access_ttl.max || self.refresh_ttl.min < self.access_ttl.min {
            return Err(ConfigurationError::Invalid(
                "refresh ttl bounds must not be shorter than access ttl bounds".into(),
            ));
        }

        for (name, value) in [
            ("revocation cache ttl", self.revocation_cache_ttl),
            ("role cache ttl", self.role_cache_ttl),
            ("role backing ttl", self.role_backing_ttl),
            ("store timeout", self.store_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigurationError::Invalid(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_ttl_is_clamped_into_bounds() {
        let access = TtlPolicy::access_default();
        assert_eq!(access.with_requested(Duration::from_secs(60)).effective(), HOUR);
        assert_eq!(access.with_requested(10 * HOUR).effective(), 2 * HOUR);
        let ninety_minutes = Duration::from_secs(90 * 60);
        assert_eq!(access.with_requested(ninety_minutes).effective(), ninety_minutes);

        let refresh = TtlPolicy::refresh_default();
        assert_eq!(refresh.effective(), 6 * HOUR);
        assert_eq!(refresh.with_requested(48 * HOUR).effective(), 12 * HOUR);
    }

    #[test]
    fn defaults_validate() {
        assert!(AuthConfig::new("auth.example.com").validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_settings() {
        assert!(AuthConfig::new("  ").validate().is_err());

        let mut cfg = AuthConfig::new("auth.example.com");
        cfg.access_ttl = TtlPolicy::new(3 * HOUR, HOUR, 2 * HOUR);
        assert!(cfg.validate().is_err());

        let mut cfg = AuthConfig::new("auth.example.com");
        cfg.refresh_ttl = TtlPolicy::new(HOUR, HOUR, HOUR);
        assert!(cfg.validate().is_err());

        let mut cfg = AuthConfig::new("auth.example.com");
        cfg.store_timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn token_id_strategy_parses() {
        assert_eq!("per-session".parse::<TokenIdStrategy>().unwrap(), TokenIdStrategy::PerSession);
        assert_eq!("PER_PRINCIPAL".parse::<TokenIdStrategy>().unwrap(), TokenIdStrategy::PerPrincipal);
        assert!("random".parse::<TokenIdStrategy>().is_err());
    }
}
