use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use super::models::UserModel;
use crate::store::StoreError;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Returns the stored user, creating it with `display_name` if absent.
    /// An existing record is returned unchanged.
    async fn get_or_create(
        &self,
        uid: &str,
        display_name: &str,
        at: DateTime<Utc>,
    ) -> Result<UserModel, StoreError>;
    async fn get(&self, uid: &str) -> Result<Option<UserModel>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, UserModel>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    #[instrument(skip(self, at))]
    async fn get_or_create(
        &self,
        uid: &str,
        display_name: &str,
        at: DateTime<Utc>,
    ) -> Result<UserModel, StoreError> {
        let mut users = self.users.write().await;
        let user = users.entry(uid.to_string()).or_insert_with(|| {
            debug!(uid = %uid, "Creating user record in memory");
            UserModel::new(uid, display_name, at)
        });
        Ok(user.clone())
    }

    async fn get(&self, uid: &str) -> Result<Option<UserModel>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(uid).cloned())
    }
}

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    #[instrument(skip(self, at))]
    async fn get_or_create(
        &self,
        uid: &str,
        display_name: &str,
        at: DateTime<Utc>,
    ) -> Result<UserModel, StoreError> {
        sqlx::query(
            "INSERT INTO users (uid, display_name, created_at, updated_at) \
             VALUES ($1, $2, $3, $3) ON CONFLICT (uid) DO NOTHING",
        )
        .bind(uid)
        .bind(display_name)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, uid = %uid, "Failed to ensure user record");
            StoreError::from(e)
        })?;

        let user = sqlx::query_as::<_, UserModel>(
            "SELECT uid, display_name, created_at, updated_at FROM users WHERE uid = $1",
        )
        .bind(uid)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get(&self, uid: &str) -> Result<Option<UserModel>, StoreError> {
        let user = sqlx::query_as::<_, UserModel>(
            "SELECT uid, display_name, created_at, updated_at FROM users WHERE uid = $1",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}
