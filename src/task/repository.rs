use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::models::{TaskStatus, TaskToggle};
use crate::clock::DateKey;
use crate::store::{decode_date_key, StoreError};

type TaskKey = (String, DateKey, Uuid);

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn add(&self, task: &TaskStatus) -> Result<(), StoreError>;
    /// Oldest first
    async fn list(&self, uid: &str, date_key: &DateKey) -> Result<Vec<TaskStatus>, StoreError>;
    async fn get(
        &self,
        uid: &str,
        date_key: &DateKey,
        task_id: Uuid,
    ) -> Result<Option<TaskStatus>, StoreError>;
    /// Writes `done` and returns the value it replaced, read in the same atomic
    /// step. A missing task is created from `text` when given, otherwise this
    /// fails with `NotFound`.
    async fn set_done(
        &self,
        uid: &str,
        date_key: &DateKey,
        task_id: Uuid,
        done: bool,
        text: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<TaskToggle, StoreError>;
    /// Returns whether a task was removed
    async fn delete(&self, uid: &str, date_key: &DateKey, task_id: Uuid)
        -> Result<bool, StoreError>;
    async fn delete_user(&self, uid: &str) -> Result<(), StoreError>;
}

fn missing(task_id: Uuid) -> StoreError {
    StoreError::NotFound(format!("task {task_id}"))
}

pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<TaskKey, TaskStatus>>,
    available: AtomicBool,
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory tasks offline".to_string()))
        }
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    #[instrument(skip(self, task), fields(uid = %task.uid, task_id = %task.task_id))]
    async fn add(&self, task: &TaskStatus) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut tasks = self.tasks.write().await;
        tasks.insert(
            (task.uid.clone(), task.date_key.clone(), task.task_id),
            task.clone(),
        );
        Ok(())
    }

    async fn list(&self, uid: &str, date_key: &DateKey) -> Result<Vec<TaskStatus>, StoreError> {
        self.ensure_available()?;
        let tasks = self.tasks.read().await;
        let mut day: Vec<TaskStatus> = tasks
            .values()
            .filter(|task| task.uid == uid && &task.date_key == date_key)
            .cloned()
            .collect();
        day.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        Ok(day)
    }

    async fn get(
        &self,
        uid: &str,
        date_key: &DateKey,
        task_id: Uuid,
    ) -> Result<Option<TaskStatus>, StoreError> {
        self.ensure_available()?;
        let tasks = self.tasks.read().await;
        Ok(tasks
            .get(&(uid.to_string(), date_key.clone(), task_id))
            .cloned())
    }

    #[instrument(skip(self, text, at))]
    async fn set_done(
        &self,
        uid: &str,
        date_key: &DateKey,
        task_id: Uuid,
        done: bool,
        text: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<TaskToggle, StoreError> {
        self.ensure_available()?;
        let mut tasks = self.tasks.write().await;
        let key = (uid.to_string(), date_key.clone(), task_id);

        if !tasks.contains_key(&key) {
            let text = text.ok_or_else(|| missing(task_id))?;
            debug!("Creating task on first toggle");
            tasks.insert(
                key.clone(),
                TaskStatus::new(uid, date_key.clone(), task_id, text, at),
            );
        }
        let task = tasks.get_mut(&key).ok_or_else(|| missing(task_id))?;

        let previous_done = task.done;
        task.mark(done, at);
        Ok(TaskToggle {
            previous_done,
            task: task.clone(),
        })
    }

    async fn delete(
        &self,
        uid: &str,
        date_key: &DateKey,
        task_id: Uuid,
    ) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let mut tasks = self.tasks.write().await;
        Ok(tasks
            .remove(&(uid.to_string(), date_key.clone(), task_id))
            .is_some())
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, uid: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut tasks = self.tasks.write().await;
        tasks.retain(|(owner, _, _), _| owner != uid);
        info!(uid = %uid, "Deleted tasks from memory");
        Ok(())
    }
}

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn set_done_once(
        &self,
        uid: &str,
        date_key: &DateKey,
        task_id: Uuid,
        done: bool,
        text: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Result<TaskToggle, StoreError>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if let Some(text) = text {
            sqlx::query(
                "INSERT INTO tasks (uid, date_key, task_id, text, done, created_at) \
                 VALUES ($1, $2, $3, $4, FALSE, $5) \
                 ON CONFLICT (uid, date_key, task_id) DO NOTHING",
            )
            .bind(uid)
            .bind(date_key.as_str())
            .bind(task_id)
            .bind(text)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE uid = $1 AND date_key = $2 AND task_id = $3 FOR UPDATE"
        ))
        .bind(uid)
        .bind(date_key.as_str())
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut task = match row {
            Some(row) => task_from_row(&row)?,
            None => return Ok(Err(missing(task_id))),
        };
        let previous_done = task.done;
        task.mark(done, at);

        sqlx::query(
            "UPDATE tasks SET done = $4, completed_at = $5 \
             WHERE uid = $1 AND date_key = $2 AND task_id = $3",
        )
        .bind(uid)
        .bind(date_key.as_str())
        .bind(task_id)
        .bind(task.done)
        .bind(task.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Ok(TaskToggle {
            previous_done,
            task,
        }))
    }
}

const TASK_COLUMNS: &str = "uid, date_key, task_id, text, done, created_at, completed_at";

fn task_from_row(row: &PgRow) -> Result<TaskStatus, sqlx::Error> {
    let raw_key: String = row.try_get("date_key")?;
    Ok(TaskStatus {
        uid: row.try_get("uid")?,
        date_key: decode_date_key(&raw_key)?,
        task_id: row.try_get("task_id")?,
        text: row.try_get("text")?,
        done: row.try_get("done")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    #[instrument(skip(self, task), fields(uid = %task.uid, task_id = %task.task_id))]
    async fn add(&self, task: &TaskStatus) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(&task.uid)
        .bind(task.date_key.as_str())
        .bind(task.task_id)
        .bind(&task.text)
        .bind(task.done)
        .bind(task.created_at)
        .bind(task.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to add task");
            StoreError::from(e)
        })?;
        Ok(())
    }

    async fn list(&self, uid: &str, date_key: &DateKey) -> Result<Vec<TaskStatus>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE uid = $1 AND date_key = $2 \
             ORDER BY created_at ASC, task_id ASC"
        ))
        .bind(uid)
        .bind(date_key.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(task_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn get(
        &self,
        uid: &str,
        date_key: &DateKey,
        task_id: Uuid,
    ) -> Result<Option<TaskStatus>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE uid = $1 AND date_key = $2 AND task_id = $3"
        ))
        .bind(uid)
        .bind(date_key.as_str())
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(task_from_row).transpose()?)
    }

    #[instrument(skip(self, text, at))]
    async fn set_done(
        &self,
        uid: &str,
        date_key: &DateKey,
        task_id: Uuid,
        done: bool,
        text: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<TaskToggle, StoreError> {
        match self
            .set_done_once(uid, date_key, task_id, done, text, at)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Failed to write task done flag");
                Err(e.into())
            }
        }
    }

    async fn delete(
        &self,
        uid: &str,
        date_key: &DateKey,
        task_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM tasks WHERE uid = $1 AND date_key = $2 AND task_id = $3")
                .bind(uid)
                .bind(date_key.as_str())
                .bind(task_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, uid: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tasks WHERE uid = $1")
            .bind(uid)
            .execute(&self.pool)
            .await?;
        info!(uid = %uid, "Deleted tasks from database");
        Ok(())
    }
}
