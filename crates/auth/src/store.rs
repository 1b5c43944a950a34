//! Capabilities the core consumes from shared infrastructure.
//!
//! Implementations live in `keystone-infra`. Every call is bounded by the
//! configured store timeout at the call site.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{PrincipalId, PrincipalRecord, RevocationEntry, Role, StoreError, TokenClass, TokenId};

/// Shared set of revoked token identifiers, one set per token class.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Idempotent set-add.
    async fn add(&self, entry: &RevocationEntry) -> Result<(), StoreError>;

    async fn contains(&self, token_id: &TokenId, class: TokenClass) -> Result<bool, StoreError>;

    /// Drop entries whose horizon has passed. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Authoritative source of role assignments.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Role names of an active principal. Empty when the principal is unknown,
    /// inactive or has no roles.
    async fn roles_of(&self, principal_id: PrincipalId) -> Result<Vec<Role>, StoreError>;
}

/// Longer-lived shared cache in front of the [`RoleStore`].
#[async_trait]
pub trait RoleCache: Send + Sync {
    async fn get(&self, principal_id: PrincipalId) -> Result<Option<Vec<Role>>, StoreError>;

    async fn put(&self, principal_id: PrincipalId, roles: &[Role], ttl: Duration) -> Result<(), StoreError>;

    async fn evict(&self, principal_id: PrincipalId) -> Result<(), StoreError>;
}

/// Account lookups used during verification and re-issuance.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// True when the account exists under this email and is active.
    async fn is_active(&self, principal_id: PrincipalId, email: &str) -> Result<bool, StoreError>;

    /// The active account record, if any.
    async fn find(&self, principal_id: PrincipalId) -> Result<Option<PrincipalRecord>, StoreError>;
}

/// Password check at login.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// The active account registered under `email` whose stored password hash
    /// matches `password`. `None` covers unknown, inactive and wrong-password
    /// alike.
    async fn authenticate(&self, email: &str, password: &str) -> Result<Option<PrincipalRecord>, StoreError>;
}
