use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::models::TaskStatus;
use super::repository::TaskRepository;
use crate::aggregate::{DailyAggregate, OverallAggregate};
use crate::auth::AuthUser;
use crate::clock::DateKey;
use crate::score::ScoreService;
use crate::scoring;
use crate::store::StoreError;

const MAX_TASK_TEXT: usize = 200;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Invalid task: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResult {
    pub task: TaskStatus,
    /// Change applied to `tasksCompleted`: +1, -1 or 0
    pub tasks_delta: i64,
    pub daily: Option<DailyAggregate>,
    pub overall: Option<OverallAggregate>,
}

/// Per-day task list. Completing a task earns the task bonus once; the
/// decision is made against the stored done flag, never the caller's view.
pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    scores: Arc<ScoreService>,
}

impl TaskService {
    pub fn new(tasks: Arc<dyn TaskRepository>, scores: Arc<ScoreService>) -> Self {
        Self { tasks, scores }
    }

    #[instrument(skip(self, text))]
    pub async fn add(
        &self,
        uid: &str,
        date_key: &DateKey,
        text: &str,
    ) -> Result<TaskStatus, TaskError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TaskError::InvalidRequest("text must not be empty".to_string()));
        }
        if text.chars().count() > MAX_TASK_TEXT {
            return Err(TaskError::InvalidRequest(format!(
                "text longer than {MAX_TASK_TEXT} characters"
            )));
        }

        let task = TaskStatus::new(uid, date_key.clone(), Uuid::new_v4(), text, self.scores.now());
        self.tasks.add(&task).await?;
        info!(task_id = %task.task_id, "Task added");
        Ok(task)
    }

    pub async fn list(&self, uid: &str, date_key: &DateKey) -> Result<Vec<TaskStatus>, TaskError> {
        Ok(self.tasks.list(uid, date_key).await?)
    }

    /// Sets the done flag and applies the resulting task delta. If the
    /// aggregate write fails the flag is put back so a later toggle can score.
    #[instrument(skip(self, user, text), fields(uid = %user.uid))]
    pub async fn toggle(
        &self,
        user: &AuthUser,
        date_key: &DateKey,
        task_id: Uuid,
        done: bool,
        text: Option<&str>,
    ) -> Result<ToggleResult, TaskError> {
        let toggle = self
            .tasks
            .set_done(&user.uid, date_key, task_id, done, text, self.scores.now())
            .await?;

        let delta = scoring::on_task_toggle(toggle.previous_done, done);
        if delta == 0 {
            return Ok(ToggleResult {
                task: toggle.task,
                tasks_delta: 0,
                daily: None,
                overall: None,
            });
        }

        match self
            .scores
            .apply_task_delta(&user.uid, date_key, delta, &user.display_name)
            .await
        {
            Ok(applied) => {
                info!(tasks_delta = delta, score = applied.daily.totals.score, "Task toggled");
                Ok(ToggleResult {
                    task: toggle.task,
                    tasks_delta: delta,
                    daily: Some(applied.daily),
                    overall: Some(applied.overall),
                })
            }
            Err(e) => {
                warn!(error = %e, "Task score update failed, restoring done flag");
                if let Err(restore) = self
                    .tasks
                    .set_done(
                        &user.uid,
                        date_key,
                        task_id,
                        toggle.previous_done,
                        None,
                        self.scores.now(),
                    )
                    .await
                {
                    error!(error = %restore, "Could not restore task done flag");
                }
                Err(e.into())
            }
        }
    }

    /// Removing a task never changes earned score
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        uid: &str,
        date_key: &DateKey,
        task_id: Uuid,
    ) -> Result<(), TaskError> {
        if self.tasks.delete(uid, date_key, task_id).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("task {task_id}")).into())
        }
    }

    pub async fn delete_user(&self, uid: &str) -> Result<(), TaskError> {
        Ok(self.tasks.delete_user(uid).await?)
    }
}
