use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::error::bounded;
use crate::{AuthConfig, RevocationStore, StoreError, TokenClaims, TokenClass, TokenId};

const LOCAL_CACHE_CAPACITY: u64 = 100_000;

/// Membership record of a revoked token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub token_id: TokenId,
    pub class: TokenClass,

    /// Expiry of the revoked token; the entry may be collected after it.
    /// `None` keeps the entry indefinitely.
    pub expires_at: Option<DateTime<Utc>>,
}

impl RevocationEntry {
    pub fn new(token_id: TokenId, class: TokenClass) -> Self {
        Self {
            token_id,
            class,
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Revocation set shared by every issuer/verifier instance, fronted by a
/// per-instance read-through cache.
///
/// Writes go straight to the store and prime the local cache, so the revoking
/// instance sees its own revocation at once. Other instances see it once their
/// cached answer expires.
pub struct RevocationRegistry {
    store: Arc<dyn RevocationStore>,
    cache: Cache<(TokenClass, TokenId), bool>,
    timeout: Duration,
}

impl RevocationRegistry {
    pub fn new(store: Arc<dyn RevocationStore>, cache_ttl: Duration, timeout: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(LOCAL_CACHE_CAPACITY)
            .time_to_live(cache_ttl)
            .build();
        Self { store, cache, timeout }
    }

    pub fn from_config(store: Arc<dyn RevocationStore>, config: &AuthConfig) -> Self {
        Self::new(store, config.revocation_cache_ttl, config.store_timeout)
    }

    pub async fn revoke(&self, token_id: &TokenId, class: TokenClass) -> Result<(), StoreError> {
        self.revoke_entry(RevocationEntry::new(token_id.clone(), class)).await
    }

    /// Revoke the token described by `claims`, using its expiry as the
    /// collection horizon.
    pub async fn revoke_claims(&self, claims: &TokenClaims, class: TokenClass) -> Result<(), StoreError> {
        self.revoke_entry(RevocationEntry::new(claims.jti.clone(), class).with_expiry(claims.exp))
            .await
    }

    pub async fn revoke_entry(&self, entry: RevocationEntry) -> Result<(), StoreError> {
        if entry.token_id.is_empty() {
            tracing::warn!(class = %entry.class, "ignoring revocation of an empty token id");
            return Ok(());
        }

        if let Err(err) = bounded(self.timeout, self.store.add(&entry)).await {
            tracing::error!(token_id = %entry.token_id, class = %entry.class, error = %err, "revocation write failed");
            return Err(err);
        }
        self.cache.insert((entry.class, entry.token_id.clone()), true).await;
        tracing::info!(token_id = %entry.token_id, class = %entry.class, "token revoked");
        Ok(())
    }

    /// Whether `(token_id, class)` is revoked. A store failure is an error,
    /// never "not revoked".
    pub async fn is_revoked(&self, token_id: &TokenId, class: TokenClass) -> Result<bool, StoreError> {
        let key = (class, token_id.clone());
        if let Some(revoked) = self.cache.get(&key).await {
            return Ok(revoked);
        }

        let revoked = bounded(self.timeout, self.store.contains(token_id, class)).await?;
        self.cache.insert(key, revoked).await;
        Ok(revoked)
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let removed = bounded(self.timeout, self.store.purge_expired(now)).await?;
        if removed > 0 {
            tracing::debug!(removed, "purged expired revocation entries");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FlakyRevocationStore, MemoryRevocationStore};
    use chrono::TimeZone;

    fn registry(store: Arc<dyn RevocationStore>, ttl: Duration) -> RevocationRegistry {
        RevocationRegistry::new(store, ttl, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn revoke_is_idempotent_and_class_scoped() {
        let store = Arc::new(MemoryRevocationStore::default());
        let reg = registry(store.clone(), Duration::from_secs(300));
        let id = TokenId::new("t-1");

        reg.revoke(&id, TokenClass::Access).await.unwrap();
        reg.revoke(&id, TokenClass::Access).await.unwrap();

        assert!(reg.is_revoked(&id, TokenClass::Access).await.unwrap());
        assert!(!reg.is_revoked(&id, TokenClass::Refresh).await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn other_instances_observe_revocation_after_cache_ttl() {
        let store: Arc<dyn RevocationStore> = Arc::new(MemoryRevocationStore::default());
        let a = registry(store.clone(), Duration::from_millis(100));
        let b = registry(store, Duration::from_millis(100));
        let id = TokenId::new("t-2");

        assert!(!b.is_revoked(&id, TokenClass::Access).await.unwrap());
        a.revoke(&id, TokenClass::Access).await.unwrap();

        assert!(a.is_revoked(&id, TokenClass::Access).await.unwrap());
        assert!(!b.is_revoked(&id, TokenClass::Access).await.unwrap());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(b.is_revoked(&id, TokenClass::Access).await.unwrap());
    }

    #[tokio::test]
    async fn store_failure_is_not_treated_as_not_revoked() {
        let reg = registry(Arc::new(FlakyRevocationStore::failing()), Duration::from_secs(300));
        let err = reg.is_revoked(&TokenId::new("t-3"), TokenClass::Access).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let reg = registry(Arc::new(FlakyRevocationStore::hanging()), Duration::from_secs(300));
        let err = reg.is_revoked(&TokenId::new("t-4"), TokenClass::Access).await.unwrap_err();
        assert_eq!(err, StoreError::Timeout(Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn purge_drops_only_expired_entries() {
        let store = Arc::new(MemoryRevocationStore::default());
        let reg = registry(store.clone(), Duration::from_secs(300));
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        reg.revoke_entry(RevocationEntry::new(TokenId::new("old"), TokenClass::Access).with_expiry(now - chrono::Duration::minutes(1)))
            .await
            .unwrap();
        reg.revoke_entry(RevocationEntry::new(TokenId::new("live"), TokenClass::Access).with_expiry(now + chrono::Duration::minutes(1)))
            .await
            .unwrap();
        reg.revoke(&TokenId::new("forever"), TokenClass::Refresh).await.unwrap();

        assert_eq!(reg.purge_expired(now).await.unwrap(), 1);
        assert_eq!(store.len(), 2);
    }
}
