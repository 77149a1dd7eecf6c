use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use super::models::TaskStatus;
use super::service::ToggleResult;
use crate::auth::AuthUser;
use crate::clock::DateKey;
use crate::shared::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct NewTask {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ToggleTask {
    pub done: bool,
    /// Creates the task with this text if it does not exist yet
    pub text: Option<String>,
}

fn parse_date_key(raw: &str) -> Result<DateKey, AppError> {
    DateKey::parse(raw).ok_or_else(|| AppError::BadRequest(format!("invalid date key: {raw}")))
}

/// GET /tasks/:date_key
#[instrument(name = "list_tasks", skip(state, user), fields(uid = %user.uid))]
pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(date_key): Path<String>,
) -> Result<Json<Vec<TaskStatus>>, AppError> {
    let date_key = parse_date_key(&date_key)?;
    let tasks = state.task_service.list(&user.uid, &date_key).await?;
    Ok(Json(tasks))
}

/// POST /tasks/:date_key
#[instrument(name = "add_task", skip(state, user, body), fields(uid = %user.uid))]
pub async fn add_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(date_key): Path<String>,
    Json(body): Json<NewTask>,
) -> Result<(StatusCode, Json<TaskStatus>), AppError> {
    let date_key = parse_date_key(&date_key)?;
    let task = state
        .task_service
        .add(&user.uid, &date_key, &body.text)
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// POST /tasks/:date_key/:task_id/toggle
#[instrument(name = "toggle_task", skip(state, user, body), fields(uid = %user.uid))]
pub async fn toggle_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((date_key, task_id)): Path<(String, Uuid)>,
    Json(body): Json<ToggleTask>,
) -> Result<Json<ToggleResult>, AppError> {
    let date_key = parse_date_key(&date_key)?;
    let result = state
        .task_service
        .toggle(&user, &date_key, task_id, body.done, body.text.as_deref())
        .await?;
    Ok(Json(result))
}

/// DELETE /tasks/:date_key/:task_id
#[instrument(name = "delete_task", skip(state, user), fields(uid = %user.uid))]
pub async fn delete_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((date_key, task_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, AppError> {
    let date_key = parse_date_key(&date_key)?;
    state
        .task_service
        .delete(&user.uid, &date_key, task_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
