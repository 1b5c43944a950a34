use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::error::bounded;
use crate::{
    AuthConfig, PermissionDecision, PolicyEngine, PolicyError, PolicyRequest, PrincipalId, Role, RoleCache, RoleStore,
    StoreError, normalize_roles,
};

const HOT_CACHE_CAPACITY: u64 = 50_000;

/// Resolves a principal's roles and asks the policy engine whether any of them
/// grants `(resource, action)`.
///
/// Role lookups go hot cache, then backing cache, then the role store. A
/// store answer populates both caches.
pub struct RoleResolver {
    store: Arc<dyn RoleStore>,
    backing: Option<Arc<dyn RoleCache>>,
    policy: Arc<dyn PolicyEngine>,
    hot: Cache<PrincipalId, Arc<Vec<Role>>>,
    backing_ttl: Duration,
    timeout: Duration,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn RoleStore>, policy: Arc<dyn PolicyEngine>, config: &AuthConfig) -> Self {
        let hot = Cache::builder()
            .max_capacity(HOT_CACHE_CAPACITY)
            .time_to_live(config.role_cache_ttl)
            .build();
        Self {
            store,
            backing: None,
            policy,
            hot,
            backing_ttl: config.role_backing_ttl,
            timeout: config.store_timeout,
        }
    }

    pub fn with_backing_cache(mut self, cache: Arc<dyn RoleCache>) -> Self {
        self.backing = Some(cache);
        self
    }

    /// Sorted, de-duplicated role names. Empty for unknown or inactive
    /// principals.
    pub async fn get_roles(&self, principal_id: PrincipalId) -> Result<Vec<Role>, StoreError> {
        if !principal_id.is_valid() {
            return Ok(Vec::new());
        }
        if let Some(roles) = self.hot.get(&principal_id).await {
            return Ok(roles.as_ref().clone());
        }

        if let Some(backing) = &self.backing {
            match bounded(self.timeout, backing.get(principal_id)).await {
                Ok(Some(roles)) => {
                    let roles = normalize_roles(roles);
                    self.hot.insert(principal_id, Arc::new(roles.clone())).await;
                    return Ok(roles);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(principal_id = %principal_id, error = %err, "role cache read failed; using role store");
                }
            }
        }

        let roles = match bounded(self.timeout, self.store.roles_of(principal_id)).await {
            Ok(roles) => normalize_roles(roles),
            Err(err) => {
                tracing::error!(principal_id = %principal_id, error = %err, "role store unavailable");
                return Err(err);
            }
        };

        if let Some(backing) = &self.backing
            && let Err(err) = bounded(self.timeout, backing.put(principal_id, &roles, self.backing_ttl)).await
        {
            tracing::warn!(principal_id = %principal_id, error = %err, "role cache write failed");
        }
        self.hot.insert(principal_id, Arc::new(roles.clone())).await;
        tracing::debug!(principal_id = %principal_id, roles = roles.len(), "resolved roles from store");
        Ok(roles)
    }

    /// Evaluate `(resource, action)` for every role of the principal in one
    /// batch. Policy errors deny; role-store failures are returned.
    pub async fn check_permission(
        &self,
        principal_id: PrincipalId,
        resource: &str,
        action: &str,
    ) -> Result<PermissionDecision, StoreError> {
        let roles = self.get_roles(principal_id).await?;
        if roles.is_empty() {
            return Ok(PermissionDecision::denied(principal_id, resource, action, roles));
        }

        let requests: Vec<PolicyRequest> = roles
            .iter()
            .map(|role| PolicyRequest::new(role.clone(), resource, action))
            .collect();

        let answers = match tokio::time::timeout(self.timeout, self.policy.batch_enforce(&requests)).await {
            Ok(Ok(answers)) => answers,
            Ok(Err(err)) => return Ok(self.deny_on_policy_error(principal_id, resource, action, roles, err)),
            Err(_) => {
                let err = PolicyError::Timeout(self.timeout);
                return Ok(self.deny_on_policy_error(principal_id, resource, action, roles, err));
            }
        };
        if answers.len() != requests.len() {
            let err = PolicyError::Evaluation(format!("expected {} answers, got {}", requests.len(), answers.len()));
            return Ok(self.deny_on_policy_error(principal_id, resource, action, roles, err));
        }

        let granted_by = requests
            .iter()
            .zip(&answers)
            .find(|(_, granted)| **granted)
            .map(|(request, _)| request.role.clone());

        Ok(PermissionDecision {
            principal_id,
            resource: resource.to_owned(),
            action: action.to_owned(),
            granted: granted_by.is_some(),
            roles,
            granted_by,
        })
    }

    /// Fail-closed form of [`check_permission`](Self::check_permission).
    pub async fn has_permission(&self, principal_id: PrincipalId, resource: &str, action: &str) -> bool {
        match self.check_permission(principal_id, resource, action).await {
            Ok(decision) => decision.granted,
            Err(_) => false,
        }
    }

    /// Drop cached roles for a principal after its assignments changed.
    pub async fn invalidate(&self, principal_id: PrincipalId) {
        self.hot.invalidate(&principal_id).await;
        if let Some(backing) = &self.backing
            && let Err(err) = bounded(self.timeout, backing.evict(principal_id)).await
        {
            tracing::warn!(principal_id = %principal_id, error = %err, "role cache eviction failed");
        }
    }

    fn deny_on_policy_error(
        &self,
        principal_id: PrincipalId,
        resource: &str,
        action: &str,
        roles: Vec<Role>,
        err: PolicyError,
    ) -> PermissionDecision {
        tracing::warn!(principal_id = %principal_id, resource, action, error = %err, "policy evaluation failed; denying");
        PermissionDecision::denied(principal_id, resource, action, roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{MemoryRoleCache, StaticPolicy, StaticRoleStore};

    fn config() -> AuthConfig {
        let mut cfg = AuthConfig::new("auth.example.com");
        cfg.store_timeout = Duration::from_millis(200);
        cfg
    }

    #[tokio::test]
    async fn permission_is_the_union_of_roles() {
        let user = PrincipalId::new();
        let store = Arc::new(StaticRoleStore::default().with(user, &["viewer", "editor"]));
        let policy = Arc::new(StaticPolicy::default().grant("editor", "/reports", "POST"));
        let resolver = RoleResolver::new(store, policy.clone(), &config());

        let decision = resolver.check_permission(user, "/reports", "POST").await.unwrap();
        assert!(decision.granted);
        assert_eq!(decision.granted_by, Some(Role::new("editor")));
        assert_eq!(decision.roles, vec![Role::new("editor"), Role::new("viewer")]);

        assert!(!resolver.has_permission(user, "/reports", "DELETE").await);
        assert_eq!(policy.calls(), 4);
    }

    #[tokio::test]
    async fn no_roles_denies_without_asking_the_policy() {
        let store = Arc::new(StaticRoleStore::default());
        let policy = Arc::new(StaticPolicy::default().grant("viewer", "/reports", "GET"));
        let resolver = RoleResolver::new(store, policy.clone(), &config());

        assert!(!resolver.has_permission(PrincipalId::new(), "/reports", "GET").await);
        assert_eq!(policy.calls(), 0);
    }

    #[tokio::test]
    async fn policy_errors_deny() {
        let user = PrincipalId::new();
        let store = Arc::new(StaticRoleStore::default().with(user, &["admin"]));
        let resolver = RoleResolver::new(store, Arc::new(StaticPolicy::failing()), &config());

        let decision = resolver.check_permission(user, "/anything", "GET").await.unwrap();
        assert!(!decision.granted);
    }

    #[tokio::test]
    async fn role_store_outage_is_reported_and_fails_closed() {
        let policy = Arc::new(StaticPolicy::default().grant("admin", "/x", "GET"));
        let resolver = RoleResolver::new(Arc::new(StaticRoleStore::failing()), policy, &config());
        let user = PrincipalId::new();

        assert!(matches!(
            resolver.check_permission(user, "/x", "GET").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(!resolver.has_permission(user, "/x", "GET").await);
    }

    #[tokio::test]
    async fn roles_are_served_from_caches_after_first_lookup() {
        let user = PrincipalId::new();
        let store = Arc::new(StaticRoleStore::default().with(user, &[" viewer", "viewer", "admin"]));
        let backing = Arc::new(MemoryRoleCache::default());
        let resolver = RoleResolver::new(store.clone(), Arc::new(StaticPolicy::default()), &config())
            .with_backing_cache(backing.clone());

        let roles = resolver.get_roles(user).await.unwrap();
        assert_eq!(roles, vec![Role::new("admin"), Role::new("viewer")]);
        assert_eq!(backing.peek(user), Some(roles.clone()));

        assert_eq!(resolver.get_roles(user).await.unwrap(), roles);
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn backing_cache_hit_skips_the_store() {
        let user = PrincipalId::new();
        let store = Arc::new(StaticRoleStore::default().with(user, &["viewer"]));
        let backing = Arc::new(MemoryRoleCache::default());
        backing.seed(user, &["auditor"]);
        let resolver = RoleResolver::new(store.clone(), Arc::new(StaticPolicy::default()), &config())
            .with_backing_cache(backing);

        assert_eq!(resolver.get_roles(user).await.unwrap(), vec![Role::new("auditor")]);
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn broken_backing_cache_falls_through_to_store() {
        let user = PrincipalId::new();
        let store = Arc::new(StaticRoleStore::default().with(user, &["viewer"]));
        let resolver = RoleResolver::new(store.clone(), Arc::new(StaticPolicy::default()), &config())
            .with_backing_cache(Arc::new(MemoryRoleCache::failing()));

        assert_eq!(resolver.get_roles(user).await.unwrap(), vec![Role::new("viewer")]);
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_lookup() {
        let user = PrincipalId::new();
        let store = Arc::new(StaticRoleStore::default().with(user, &["viewer"]));
        let resolver = RoleResolver::new(store.clone(), Arc::new(StaticPolicy::default()), &config());

        resolver.get_roles(user).await.unwrap();
        resolver.invalidate(user).await;
        resolver.get_roles(user).await.unwrap();
        assert_eq!(store.calls(), 2);
    }
}
