//! Service wiring: keys, stores, caches, policy and the auth pipeline on top.

use std::sync::Arc;

use thiserror::Error;

use keystone_auth::{
    AuthConfig, Authorizer, ConfigurationError, CredentialStore, KeyMaterial, PolicyEngine, PrincipalDirectory,
    RevocationRegistry, RevocationStore, RoleCache, RoleResolver, RoleStore, StoreError, TokenIssuer, TokenVerifier,
};
use keystone_infra::{
    CsvPolicy, InMemoryRevocationStore, InMemoryRoleCache, InMemoryUserStore, PolicyLoadError, PostgresUserStore,
    RedisRevocationStore, RedisRoleCache,
};

use crate::config::{ApiConfig, DEFAULT_MIN_PASSWORD_LENGTH};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("policy: {0}")]
    Policy(#[from] PolicyLoadError),

    #[error("backend: {0}")]
    Store(#[from] StoreError),
}

/// Capability implementations the auth pipeline runs on.
#[derive(Clone)]
pub struct Backends {
    pub revocations: Arc<dyn RevocationStore>,
    pub roles: Arc<dyn RoleStore>,
    pub directory: Arc<dyn PrincipalDirectory>,
    pub credentials: Arc<dyn CredentialStore>,
    pub role_cache: Option<Arc<dyn RoleCache>>,
    pub policy: Arc<dyn PolicyEngine>,
}

/// Everything the handlers need, built once at startup.
pub struct AuthServices {
    pub config: Arc<AuthConfig>,
    pub issuer: Arc<TokenIssuer>,
    pub authorizer: Arc<Authorizer>,
    pub revocations: Arc<RevocationRegistry>,
    pub directory: Arc<dyn PrincipalDirectory>,
    pub credentials: Arc<dyn CredentialStore>,
    pub min_password_length: usize,
}

impl AuthServices {
    pub fn new(keys: Arc<KeyMaterial>, config: Arc<AuthConfig>, backends: Backends) -> Self {
        let revocations = Arc::new(RevocationRegistry::from_config(backends.revocations, &config));
        let verifier = Arc::new(TokenVerifier::new(
            keys.clone(),
            config.clone(),
            revocations.clone(),
            backends.directory.clone(),
        ));

        let mut resolver = RoleResolver::new(backends.roles, backends.policy, &config);
        if let Some(cache) = backends.role_cache {
            resolver = resolver.with_backing_cache(cache);
        }

        Self {
            issuer: Arc::new(TokenIssuer::new(keys, config.clone())),
            authorizer: Arc::new(Authorizer::new(verifier, Arc::new(resolver))),
            revocations,
            directory: backends.directory,
            credentials: backends.credentials,
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            config,
        }
    }

    pub fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = length;
        self
    }
}

/// Load keys and policy, connect the configured backends and wire the
/// pipeline. Any failure here is fatal.
pub async fn build_services(config: &ApiConfig) -> Result<AuthServices, StartupError> {
    let keys = Arc::new(KeyMaterial::load(&config.key_path)?);
    let policy: Arc<dyn PolicyEngine> = Arc::new(CsvPolicy::from_path(&config.policy_path)?);

    let (revocations, role_cache): (Arc<dyn RevocationStore>, Arc<dyn RoleCache>) = match &config.redis_url {
        Some(url) => {
            tracing::info!("using redis revocation store and role cache");
            let revocations = RedisRevocationStore::connect(url).await?;
            let role_cache = RedisRoleCache::connect(url).await?;
            (Arc::new(revocations) as Arc<dyn RevocationStore>, Arc::new(role_cache) as Arc<dyn RoleCache>)
        }
        None => (
            Arc::new(InMemoryRevocationStore::new()) as Arc<dyn RevocationStore>,
            Arc::new(InMemoryRoleCache::new()) as Arc<dyn RoleCache>,
        ),
    };

    let (roles, directory, credentials): (Arc<dyn RoleStore>, Arc<dyn PrincipalDirectory>, Arc<dyn CredentialStore>) =
        match &config.database_url {
            Some(url) => {
                tracing::info!("using postgres user store");
                let store = Arc::new(PostgresUserStore::connect(url).await?);
                (
                    store.clone() as Arc<dyn RoleStore>,
                    store.clone() as Arc<dyn PrincipalDirectory>,
                    store as Arc<dyn CredentialStore>,
                )
            }
            None => {
                let store = Arc::new(InMemoryUserStore::new());
                (
                    store.clone() as Arc<dyn RoleStore>,
                    store.clone() as Arc<dyn PrincipalDirectory>,
                    store as Arc<dyn CredentialStore>,
                )
            }
        };

    Ok(AuthServices::new(
        keys,
        Arc::new(config.auth.clone()),
        Backends {
            revocations,
            roles,
            directory,
            credentials,
            role_cache: Some(role_cache),
            policy,
        },
    )
    .with_min_password_length(config.min_password_length))
}
