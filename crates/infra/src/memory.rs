//! In-memory adapters for tests and single-instance development.
//!
//! Every instance holds its own state, so these stores give no cross-process
//! revocation or role sharing.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use keystone_auth::{
    CredentialStore, PrincipalDirectory, PrincipalId, PrincipalRecord, RevocationEntry, RevocationStore, Role,
    RoleCache, RoleStore, StoreError, TokenClass, TokenId,
};

use crate::password::verify_password_blocking;

fn poisoned() -> StoreError {
    StoreError::unavailable("in-memory store lock poisoned")
}

/// Revocation set keyed by `(class, token_id)` with an optional GC horizon.
#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    inner: RwLock<HashMap<(TokenClass, TokenId), Option<DateTime<Utc>>>>,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn add(&self, entry: &RevocationEntry) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let horizon = map.entry((entry.class, entry.token_id.clone())).or_insert(entry.expires_at);
        // Keep the later horizon when a token is revoked twice.
        *horizon = match (*horizon, entry.expires_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        Ok(())
    }

    async fn contains(&self, token_id: &TokenId, class: TokenClass) -> Result<bool, StoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.contains_key(&(class, token_id.clone())))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let before = map.len();
        map.retain(|_, horizon| horizon.is_none_or(|at| at > now));
        Ok((before - map.len()) as u64)
    }
}

#[derive(Debug, Clone)]
struct StoredUser {
    record: PrincipalRecord,
    roles: Vec<Role>,
    password_hash: Option<String>,
    deleted: bool,
}

/// User store holding accounts, their role assignments and password hashes.
///
/// Only active, non-deleted accounts report roles, count as active or can log
/// in, the way the SQL adapter filters rows.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    inner: RwLock<HashMap<PrincipalId, StoredUser>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, record: PrincipalRecord, roles: Vec<Role>) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let password_hash = map.get(&record.id).and_then(|user| user.password_hash.clone());
        map.insert(
            record.id,
            StoredUser {
                record,
                roles,
                password_hash,
                deleted: false,
            },
        );
        Ok(())
    }

    pub fn set_roles(&self, principal_id: PrincipalId, roles: Vec<Role>) -> Result<(), StoreError> {
        self.update(principal_id, |user| user.roles = roles)
    }

    pub fn set_active(&self, principal_id: PrincipalId, active: bool) -> Result<(), StoreError> {
        self.update(principal_id, |user| user.record.active = active)
    }

    /// Store a PHC password hash, as produced by [`crate::password::hash_password`].
    pub fn set_password_hash(&self, principal_id: PrincipalId, hash: impl Into<String>) -> Result<(), StoreError> {
        let hash = hash.into();
        self.update(principal_id, |user| user.password_hash = Some(hash))
    }

    /// Soft-delete, mirroring a `deleted_at` column.
    pub fn delete(&self, principal_id: PrincipalId) -> Result<(), StoreError> {
        self.update(principal_id, |user| user.deleted = true)
    }

    /// Writes to unknown accounts are ignored.
    fn update(&self, principal_id: PrincipalId, apply: impl FnOnce(&mut StoredUser)) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        if let Some(user) = map.get_mut(&principal_id) {
            apply(user);
        }
        Ok(())
    }

    fn live(&self, principal_id: PrincipalId) -> Result<Option<StoredUser>, StoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map
            .get(&principal_id)
            .filter(|user| user.record.active && !user.deleted)
            .cloned())
    }
}

#[async_trait]
impl RoleStore for InMemoryUserStore {
    async fn roles_of(&self, principal_id: PrincipalId) -> Result<Vec<Role>, StoreError> {
        Ok(self.live(principal_id)?.map(|user| user.roles).unwrap_or_default())
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryUserStore {
    async fn is_active(&self, principal_id: PrincipalId, email: &str) -> Result<bool, StoreError> {
        Ok(self
            .live(principal_id)?
            .is_some_and(|user| user.record.email == email))
    }

    async fn find(&self, principal_id: PrincipalId) -> Result<Option<PrincipalRecord>, StoreError> {
        Ok(self.live(principal_id)?.map(|user| user.record))
    }
}

#[async_trait]
impl CredentialStore for InMemoryUserStore {
    async fn authenticate(&self, email: &str, password: &str) -> Result<Option<PrincipalRecord>, StoreError> {
        let candidate = {
            let map = self.inner.read().map_err(|_| poisoned())?;
            map.values()
                .find(|user| user.record.active && !user.deleted && user.record.email == email)
                .and_then(|user| Some((user.record.clone(), user.password_hash.clone()?)))
        };
        let Some((record, stored)) = candidate else {
            return Ok(None);
        };

        Ok(verify_password_blocking(password, stored).await.then_some(record))
    }
}

/// Expiring role cache standing in for the shared backing cache.
#[derive(Debug, Default)]
pub struct InMemoryRoleCache {
    inner: RwLock<HashMap<PrincipalId, (Vec<Role>, Instant)>>,
}

impl InMemoryRoleCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleCache for InMemoryRoleCache {
    async fn get(&self, principal_id: PrincipalId) -> Result<Option<Vec<Role>>, StoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map
            .get(&principal_id)
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(roles, _)| roles.clone()))
    }

    async fn put(&self, principal_id: PrincipalId, roles: &[Role], ttl: Duration) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert(principal_id, (roles.to_vec(), Instant::now() + ttl));
        Ok(())
    }

    async fn evict(&self, principal_id: PrincipalId) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.remove(&principal_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::{HashCost, hash_password};
    use chrono::TimeZone;

    #[tokio::test]
    async fn revocation_store_is_idempotent_and_keeps_latest_horizon() {
        let store = InMemoryRevocationStore::new();
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        let id = TokenId::new("t");

        store
            .add(&RevocationEntry::new(id.clone(), TokenClass::Access).with_expiry(now))
            .await
            .unwrap();
        store
            .add(&RevocationEntry::new(id.clone(), TokenClass::Access).with_expiry(now + chrono::Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.contains(&id, TokenClass::Access).await.unwrap());
        assert!(!store.contains(&id, TokenClass::Refresh).await.unwrap());

        assert_eq!(store.purge_expired(now + chrono::Duration::minutes(30)).await.unwrap(), 0);
        assert_eq!(store.purge_expired(now + chrono::Duration::hours(2)).await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn user_store_hides_inactive_and_deleted_accounts() {
        let store = InMemoryUserStore::new();
        let active = PrincipalRecord::new(PrincipalId::new(), "a@example.com");
        let inactive = PrincipalRecord::new(PrincipalId::new(), "b@example.com");
        let deleted = PrincipalRecord::new(PrincipalId::new(), "c@example.com");
        for record in [&active, &inactive, &deleted] {
            store.upsert(record.clone(), vec![Role::new("viewer")]).unwrap();
        }
        store.set_active(inactive.id, false).unwrap();
        store.delete(deleted.id).unwrap();

        assert_eq!(store.roles_of(active.id).await.unwrap(), vec![Role::new("viewer")]);
        assert!(store.roles_of(inactive.id).await.unwrap().is_empty());
        assert!(store.roles_of(deleted.id).await.unwrap().is_empty());
        assert!(store.roles_of(PrincipalId::new()).await.unwrap().is_empty());

        assert!(store.is_active(active.id, "a@example.com").await.unwrap());
        assert!(!store.is_active(active.id, "other@example.com").await.unwrap());
        assert!(!store.is_active(inactive.id, "b@example.com").await.unwrap());
        assert!(store.find(deleted.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn authenticate_checks_password_and_account_state() {
        let cost = HashCost {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        };
        let store = InMemoryUserStore::new();
        let user = PrincipalRecord::new(PrincipalId::new(), "a@example.com");
        let no_password = PrincipalRecord::new(PrincipalId::new(), "b@example.com");
        store.upsert(user.clone(), vec![]).unwrap();
        store.upsert(no_password.clone(), vec![]).unwrap();
        store
            .set_password_hash(user.id, hash_password("long enough pw", cost).unwrap())
            .unwrap();

        assert_eq!(store.authenticate("a@example.com", "long enough pw").await.unwrap(), Some(user.clone()));
        assert_eq!(store.authenticate("a@example.com", "wrong password").await.unwrap(), None);
        assert_eq!(store.authenticate("nobody@example.com", "long enough pw").await.unwrap(), None);
        assert_eq!(store.authenticate("b@example.com", "").await.unwrap(), None);

        // Re-upserting keeps the stored hash.
        store.upsert(user.clone(), vec![Role::new("viewer")]).unwrap();
        assert!(store.authenticate("a@example.com", "long enough pw").await.unwrap().is_some());

        store.set_active(user.id, false).unwrap();
        assert_eq!(store.authenticate("a@example.com", "long enough pw").await.unwrap(), None);
    }

    #[test]
    fn writes_fail_loudly_on_a_poisoned_lock() {
        let store = std::sync::Arc::new(InMemoryUserStore::new());
        let user = PrincipalRecord::new(PrincipalId::new(), "a@example.com");
        store.upsert(user.clone(), vec![]).unwrap();

        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(store.upsert(user.clone(), vec![]).is_err());
        assert!(store.set_roles(user.id, vec![Role::new("viewer")]).is_err());
        assert!(store.set_active(user.id, false).is_err());
        assert!(store.set_password_hash(user.id, "x").is_err());
        assert!(store.delete(user.id).is_err());
    }

    #[tokio::test]
    async fn role_cache_entries_expire() {
        let cache = InMemoryRoleCache::new();
        let id = PrincipalId::new();
        cache.put(id, &[Role::new("viewer")], Duration::from_millis(20)).await.unwrap();
        assert_eq!(cache.get(id).await.unwrap(), Some(vec![Role::new("viewer")]));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get(id).await.unwrap(), None);
    }
}
