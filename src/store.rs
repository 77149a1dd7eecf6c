//! Error type and conflict-retry policy shared by every durable repository.

use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::clock::DateKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write conflict not resolved after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Whether the caller should keep its local state and try again later
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::InvariantViolation(err.to_string())
            }
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

/// Serialization failure or deadlock: the transaction lost a race and can be replayed
pub fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001") | Some("40P01")),
        _ => false,
    }
}

/// Decodes a stored `YYYY-MM-DD` column
pub fn decode_date_key(raw: &str) -> Result<DateKey, sqlx::Error> {
    DateKey::parse(raw)
        .ok_or_else(|| sqlx::Error::Decode(format!("stored date key {raw} is invalid").into()))
}

/// Bounded retry for read-modify-write transactions that lose a race
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Sleeps a little before the next attempt; jittered so contenders spread out
    pub async fn pause(&self, attempt: u32) {
        if self.base_delay.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        let base = self.base_delay.as_millis() as u64 * u64::from(attempt);
        let jitter = rand::rng().random_range(0..=base.max(1));
        debug!(attempt, delay_ms = base + jitter, "Retrying after write conflict");
        tokio::time::sleep(Duration::from_millis(base + jitter)).await;
    }
}
