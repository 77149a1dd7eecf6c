use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scoring::AnswerMode;

/// Immutable record of one practice run, kept for history display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    /// The commit id of the run, so a retried commit rewrites the same record
    pub id: Uuid,
    pub uid: String,
    pub deck_name: String,
    pub mode: AnswerMode,
    pub correct: i64,
    pub wrong: i64,
    pub skipped: i64,
    pub total: i64,
    /// Client clock
    pub created_at: DateTime<Utc>,
    /// Store clock, set on first write
    pub created_at_server: DateTime<Utc>,
}
