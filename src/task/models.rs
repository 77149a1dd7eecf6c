use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::DateKey;

/// A learner's to-do item for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub uid: String,
    pub date_key: DateKey,
    pub task_id: Uuid,
    pub text: String,
    pub done: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskStatus {
    pub fn new(uid: &str, date_key: DateKey, task_id: Uuid, text: &str, at: DateTime<Utc>) -> Self {
        Self {
            uid: uid.to_string(),
            date_key,
            task_id,
            text: text.to_string(),
            done: false,
            created_at: at,
            completed_at: None,
        }
    }

    /// Sets `done`; `completed_at` records when it last went from false to true
    pub fn mark(&mut self, done: bool, at: DateTime<Utc>) {
        if !done {
            self.completed_at = None;
        } else if !self.done {
            self.completed_at = Some(at);
        }
        self.done = done;
    }
}

/// Outcome of a done-flag write: the stored value it replaced and the new record
#[derive(Debug, Clone, PartialEq)]
pub struct TaskToggle {
    pub previous_done: bool,
    pub task: TaskStatus,
}
