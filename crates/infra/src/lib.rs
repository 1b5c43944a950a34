//! Infrastructure adapters for the auth core: stores, caches, password hashing
//! and the policy engine.

pub mod memory;
pub mod password;
pub mod policy;
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use memory::{InMemoryRevocationStore, InMemoryRoleCache, InMemoryUserStore};
pub use password::{HashCost, PasswordError, hash_password, verify_password};
pub use policy::{CsvPolicy, PolicyLoadError};
pub use postgres::PostgresUserStore;

#[cfg(feature = "redis")]
pub use redis_store::{RedisRevocationStore, RedisRoleCache};
