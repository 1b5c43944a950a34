//! Redis adapters: the shared revocation set and the backing role cache.
//!
//! - **Revocations**: one sorted set per token class (`access-tokens:revoked`,
//!   `refresh-tokens:revoked`); member = token id, score = collection horizon
//!   in unix seconds (`+inf` when unknown).
//! - **Roles**: `roles:{principal_id}` holds a JSON array of role names with
//!   a TTL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;

use keystone_auth::{
    PrincipalId, RevocationEntry, RevocationStore, Role, RoleCache, StoreError, TokenClass, TokenId,
};

const ACCESS_REVOKED_KEY: &str = "access-tokens:revoked";
const REFRESH_REVOKED_KEY: &str = "refresh-tokens:revoked";
const ROLE_KEY_PREFIX: &str = "roles";

fn revoked_key(class: TokenClass) -> &'static str {
    match class {
        TokenClass::Access => ACCESS_REVOKED_KEY,
        TokenClass::Refresh => REFRESH_REVOKED_KEY,
    }
}

fn role_key(principal_id: PrincipalId) -> String {
    format!("{ROLE_KEY_PREFIX}:{principal_id}")
}

fn command_error(operation: &str, err: redis::RedisError) -> StoreError {
    StoreError::unavailable(format!("redis {operation}: {err}"))
}

async fn connect(redis_url: &str) -> Result<MultiplexedConnection, StoreError> {
    let client = redis::Client::open(redis_url).map_err(|e| command_error("open", e))?;
    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| command_error("connect", e))
}

#[derive(Clone)]
pub struct RedisRevocationStore {
    conn: MultiplexedConnection,
}

impl RedisRevocationStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            conn: connect(redis_url).await?,
        })
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn add(&self, entry: &RevocationEntry) -> Result<(), StoreError> {
        let score = match entry.expires_at {
            Some(at) => at.timestamp().to_string(),
            None => "+inf".to_owned(),
        };
        let mut conn = self.conn.clone();
        // GT keeps the later horizon when the same token is revoked twice.
        let _: i64 = redis::cmd("ZADD")
            .arg(revoked_key(entry.class))
            .arg("GT")
            .arg(&score)
            .arg(entry.token_id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("ZADD", e))?;
        Ok(())
    }

    async fn contains(&self, token_id: &TokenId, class: TokenClass) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let score: Option<String> = redis::cmd("ZSCORE")
            .arg(revoked_key(class))
            .arg(token_id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("ZSCORE", e))?;
        Ok(score.is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let upper = format!("({}", now.timestamp());
        let mut removed = 0u64;
        for key in [ACCESS_REVOKED_KEY, REFRESH_REVOKED_KEY] {
            let n: u64 = redis::cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg("-inf")
                .arg(&upper)
                .query_async(&mut conn)
                .await
                .map_err(|e| command_error("ZREMRANGEBYSCORE", e))?;
            removed += n;
        }
        Ok(removed)
    }
}

#[derive(Clone)]
pub struct RedisRoleCache {
    conn: MultiplexedConnection,
}

impl RedisRoleCache {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            conn: connect(redis_url).await?,
        })
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RoleCache for RedisRoleCache {
    async fn get(&self, principal_id: PrincipalId) -> Result<Option<Vec<Role>>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(role_key(principal_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("GET", e))?;

        match raw {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::unavailable(format!("corrupt role cache entry: {e}"))),
        }
    }

    async fn put(&self, principal_id: PrincipalId, roles: &[Role], ttl: Duration) -> Result<(), StoreError> {
        let json = serde_json::to_string(roles).map_err(|e| StoreError::unavailable(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(role_key(principal_id))
            .arg(json)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("SET", e))?;
        Ok(())
    }

    async fn evict(&self, principal_id: PrincipalId) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(role_key(principal_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("DEL", e))?;
        Ok(())
    }
}
