//! In-crate test doubles for the store and policy capabilities.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    PolicyEngine, PolicyError, PolicyRequest, PrincipalDirectory, PrincipalId, PrincipalRecord, RevocationEntry,
    RevocationStore, Role, RoleCache, RoleStore, StoreError, TokenClass, TokenId,
};

#[derive(Default)]
pub struct MemoryRevocationStore {
    entries: Mutex<HashMap<(TokenClass, TokenId), Option<DateTime<Utc>>>>,
}

impl MemoryRevocationStore {
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn add(&self, entry: &RevocationEntry) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap()
            .insert((entry.class, entry.token_id.clone()), entry.expires_at);
        Ok(())
    }

    async fn contains(&self, token_id: &TokenId, class: TokenClass) -> Result<bool, StoreError> {
        Ok(self.entries.lock().unwrap().contains_key(&(class, token_id.clone())))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, horizon| horizon.is_none_or(|at| at > now));
        Ok((before - entries.len()) as u64)
    }
}

pub enum FlakyRevocationStore {
    Failing,
    Hanging,
}

impl FlakyRevocationStore {
    pub fn failing() -> Self {
        FlakyRevocationStore::Failing
    }

    pub fn hanging() -> Self {
        FlakyRevocationStore::Hanging
    }

    async fn misbehave<T>(&self) -> Result<T, StoreError> {
        if let FlakyRevocationStore::Hanging = self {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Err(StoreError::unavailable("connection refused"))
    }
}

#[async_trait]
impl RevocationStore for FlakyRevocationStore {
    async fn add(&self, _entry: &RevocationEntry) -> Result<(), StoreError> {
        self.misbehave().await
    }

    async fn contains(&self, _token_id: &TokenId, _class: TokenClass) -> Result<bool, StoreError> {
        self.misbehave().await
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.misbehave().await
    }
}

/// Role store with fixed assignments that counts lookups.
#[derive(Default)]
pub struct StaticRoleStore {
    roles: HashMap<PrincipalId, Vec<Role>>,
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl StaticRoleStore {
    pub fn with(mut self, principal: PrincipalId, roles: &[&'static str]) -> Self {
        self.roles.insert(principal, roles.iter().map(|r| Role::new(*r)).collect());
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleStore for StaticRoleStore {
    async fn roles_of(&self, principal_id: PrincipalId) -> Result<Vec<Role>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StoreError::unavailable("database down"));
        }
        Ok(self.roles.get(&principal_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemoryRoleCache {
    entries: Mutex<HashMap<PrincipalId, Vec<Role>>>,
    pub fail: bool,
}

impl MemoryRoleCache {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn peek(&self, principal_id: PrincipalId) -> Option<Vec<Role>> {
        self.entries.lock().unwrap().get(&principal_id).cloned()
    }

    pub fn seed(&self, principal_id: PrincipalId, roles: &[&'static str]) {
        self.entries
            .lock()
            .unwrap()
            .insert(principal_id, roles.iter().map(|r| Role::new(*r)).collect());
    }
}

#[async_trait]
impl RoleCache for MemoryRoleCache {
    async fn get(&self, principal_id: PrincipalId) -> Result<Option<Vec<Role>>, StoreError> {
        if self.fail {
            return Err(StoreError::unavailable("cache down"));
        }
        Ok(self.peek(principal_id))
    }

    async fn put(&self, principal_id: PrincipalId, roles: &[Role], _ttl: Duration) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::unavailable("cache down"));
        }
        self.entries.lock().unwrap().insert(principal_id, roles.to_vec());
        Ok(())
    }

    async fn evict(&self, principal_id: PrincipalId) -> Result<(), StoreError> {
        self.entries.lock().unwrap().remove(&principal_id);
        Ok(())
    }
}

/// Grants exactly the listed `(role, resource, action)` triples.
#[derive(Default)]
pub struct StaticPolicy {
    grants: HashSet<(String, String, String)>,
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl StaticPolicy {
    pub fn grant(mut self, role: &str, resource: &str, action: &str) -> Self {
        self.grants.insert((role.to_owned(), resource.to_owned(), action.to_owned()));
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyEngine for StaticPolicy {
    async fn enforce(&self, request: &PolicyRequest) -> Result<bool, PolicyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PolicyError::Evaluation("model not loaded".into()));
        }
        Ok(self.grants.contains(&(
            request.role.as_str().to_owned(),
            request.resource.clone(),
            request.action.clone(),
        )))
    }
}

/// Directory of known accounts; anything else is inactive.
#[derive(Default)]
pub struct StaticDirectory {
    records: Mutex<HashMap<PrincipalId, PrincipalRecord>>,
    pub fail: bool,
}

impl StaticDirectory {
    pub fn with(self, record: PrincipalRecord) -> Self {
        self.records.lock().unwrap().insert(record.id, record);
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn deactivate(&self, principal_id: PrincipalId) {
        if let Some(record) = self.records.lock().unwrap().get_mut(&principal_id) {
            record.active = false;
        }
    }
}

#[async_trait]
impl PrincipalDirectory for StaticDirectory {
    async fn is_active(&self, principal_id: PrincipalId, email: &str) -> Result<bool, StoreError> {
        if self.fail {
            return Err(StoreError::unavailable("directory down"));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&principal_id)
            .is_some_and(|r| r.active && r.email == email))
    }

    async fn find(&self, principal_id: PrincipalId) -> Result<Option<PrincipalRecord>, StoreError> {
        if self.fail {
            return Err(StoreError::unavailable("directory down"));
        }
        Ok(self.records.lock().unwrap().get(&principal_id).filter(|r| r.active).cloned())
    }
}
