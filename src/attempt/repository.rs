use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::models::Attempt;
use crate::scoring::AnswerMode;
use crate::store::StoreError;

#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Stores the attempt. Writing the same id again replaces the counts but
    /// keeps the first `created_at_server`.
    async fn append(&self, attempt: &Attempt) -> Result<Attempt, StoreError>;
    /// Newest first
    async fn list_for_user(&self, uid: &str, limit: usize) -> Result<Vec<Attempt>, StoreError>;
    async fn delete_user(&self, uid: &str) -> Result<(), StoreError>;
}

pub struct InMemoryAttemptRepository {
    attempts: RwLock<HashMap<Uuid, Attempt>>,
    available: AtomicBool,
}

impl Default for InMemoryAttemptRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAttemptRepository {
    pub fn new() -> Self {
        Self {
            attempts: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn count(&self) -> usize {
        self.attempts.read().await.len()
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory attempts offline".to_string()))
        }
    }
}

#[async_trait]
impl AttemptRepository for InMemoryAttemptRepository {
    #[instrument(skip(self, attempt), fields(attempt_id = %attempt.id, uid = %attempt.uid))]
    async fn append(&self, attempt: &Attempt) -> Result<Attempt, StoreError> {
        self.ensure_available()?;
        let mut attempts = self.attempts.write().await;
        let stored = match attempts.get(&attempt.id) {
            Some(existing) => {
                debug!("Attempt already recorded, refreshing counts");
                Attempt {
                    created_at_server: existing.created_at_server,
                    ..attempt.clone()
                }
            }
            None => attempt.clone(),
        };
        attempts.insert(attempt.id, stored.clone());
        Ok(stored)
    }

    async fn list_for_user(&self, uid: &str, limit: usize) -> Result<Vec<Attempt>, StoreError> {
        self.ensure_available()?;
        let attempts = self.attempts.read().await;
        let mut owned: Vec<Attempt> = attempts
            .values()
            .filter(|attempt| attempt.uid == uid)
            .cloned()
            .collect();
        owned.sort_by(|a, b| {
            b.created_at_server
                .cmp(&a.created_at_server)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        owned.truncate(limit);
        Ok(owned)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, uid: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut attempts = self.attempts.write().await;
        attempts.retain(|_, attempt| attempt.uid != uid);
        info!(uid = %uid, "Deleted attempts from memory");
        Ok(())
    }
}

pub struct PostgresAttemptRepository {
    pool: PgPool,
}

impl PostgresAttemptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ATTEMPT_COLUMNS: &str = "id, uid, deck_name, mode, correct, wrong, skipped, total, \
     created_at, created_at_server";

fn attempt_from_row(row: &PgRow) -> Result<Attempt, sqlx::Error> {
    let raw_mode: String = row.try_get("mode")?;
    let mode: AnswerMode = raw_mode
        .parse()
        .map_err(|e| sqlx::Error::Decode(format!("stored mode {raw_mode}: {e}").into()))?;
    Ok(Attempt {
        id: row.try_get("id")?,
        uid: row.try_get("uid")?,
        deck_name: row.try_get("deck_name")?,
        mode,
        correct: row.try_get("correct")?,
        wrong: row.try_get("wrong")?,
        skipped: row.try_get("skipped")?,
        total: row.try_get("total")?,
        created_at: row.try_get("created_at")?,
        created_at_server: row.try_get("created_at_server")?,
    })
}

#[async_trait]
impl AttemptRepository for PostgresAttemptRepository {
    #[instrument(skip(self, attempt), fields(attempt_id = %attempt.id, uid = %attempt.uid))]
    async fn append(&self, attempt: &Attempt) -> Result<Attempt, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO attempts ({ATTEMPT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET \
             correct = EXCLUDED.correct, wrong = EXCLUDED.wrong, \
             skipped = EXCLUDED.skipped, total = EXCLUDED.total \
             RETURNING {ATTEMPT_COLUMNS}"
        ))
        .bind(attempt.id)
        .bind(&attempt.uid)
        .bind(&attempt.deck_name)
        .bind(attempt.mode.to_string())
        .bind(attempt.correct)
        .bind(attempt.wrong)
        .bind(attempt.skipped)
        .bind(attempt.total)
        .bind(attempt.created_at)
        .bind(attempt.created_at_server)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to record attempt");
            StoreError::from(e)
        })?;

        Ok(attempt_from_row(&row)?)
    }

    async fn list_for_user(&self, uid: &str, limit: usize) -> Result<Vec<Attempt>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE uid = $1 \
             ORDER BY created_at_server DESC, created_at DESC LIMIT $2"
        ))
        .bind(uid)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(attempt_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, uid: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM attempts WHERE uid = $1")
            .bind(uid)
            .execute(&self.pool)
            .await?;
        info!(uid = %uid, removed = result.rows_affected(), "Deleted attempts from database");
        Ok(())
    }
}
