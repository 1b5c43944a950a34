//! Postgres-backed user store: role assignments and account status.
//!
//! Expected schema (owned by the user service):
//!
//! - `users(id uuid, first_name text null, last_name text null, email text,
//!   password text, active bool, deleted_at timestamptz null)`, where
//!   `password` is an argon2id PHC string
//! - `roles(id uuid, name text)`
//! - `user_roles(user_id uuid, role_id uuid, deleted_at timestamptz null)`

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use keystone_auth::{CredentialStore, PrincipalDirectory, PrincipalId, PrincipalRecord, Role, RoleStore, StoreError};

use crate::password::verify_password_blocking;

/// Upper bound on role names returned for one principal.
const MAX_ROLES_PER_PRINCIPAL: i64 = 10;

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    tracing::error!(operation, error = %err, "postgres user store query failed");
    StoreError::unavailable(format!("{operation}: {err}"))
}

#[derive(Debug, Clone)]
pub struct PostgresUserStore {
    pool: Arc<PgPool>,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RoleStore for PostgresUserStore {
    async fn roles_of(&self, principal_id: PrincipalId) -> Result<Vec<Role>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT r.name
            FROM roles r
            INNER JOIN user_roles ur ON ur.role_id = r.id
            INNER JOIN users u ON u.id = ur.user_id
            WHERE u.id = $1
              AND u.active = TRUE
              AND u.deleted_at IS NULL
              AND ur.deleted_at IS NULL
            ORDER BY r.name
            LIMIT $2
            "#,
        )
        .bind(principal_id.as_uuid())
        .bind(MAX_ROLES_PER_PRINCIPAL)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("roles_of", e))?;

        Ok(names.into_iter().map(Role::from).collect())
    }
}

#[async_trait]
impl PrincipalDirectory for PostgresUserStore {
    async fn is_active(&self, principal_id: PrincipalId, email: &str) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM users
                WHERE id = $1 AND email = $2 AND active = TRUE AND deleted_at IS NULL
            )
            "#,
        )
        .bind(principal_id.as_uuid())
        .bind(email)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("is_active", e))
    }

    async fn find(&self, principal_id: PrincipalId) -> Result<Option<PrincipalRecord>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, Option<String>, Option<String>, String)>(
            r#"
            SELECT id, first_name, last_name, email
            FROM users
            WHERE id = $1 AND active = TRUE AND deleted_at IS NULL
            "#,
        )
        .bind(principal_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find", e))?;

        Ok(row.map(|(id, first_name, last_name, email)| PrincipalRecord {
            id: PrincipalId::from_uuid(id),
            first_name,
            last_name,
            email,
            active: true,
        }))
    }
}

#[async_trait]
impl CredentialStore for PostgresUserStore {
    async fn authenticate(&self, email: &str, password: &str) -> Result<Option<PrincipalRecord>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, Option<String>, Option<String>, String, String)>(
            r#"
            SELECT id, first_name, last_name, email, password
            FROM users
            WHERE email = $1 AND active = TRUE AND deleted_at IS NULL
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("authenticate", e))?;

        let Some((id, first_name, last_name, email, stored)) = row else {
            return Ok(None);
        };
        if !verify_password_blocking(password, stored).await {
            return Ok(None);
        }

        Ok(Some(PrincipalRecord {
            id: PrincipalId::from_uuid(id),
            first_name,
            last_name,
            email,
            active: true,
        }))
    }
}
