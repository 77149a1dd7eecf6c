use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use tracing::{info, instrument};

use super::types::{CommitReceipt, CommitRequest, Progress};
use crate::attempt::Attempt;
use crate::auth::AuthUser;
use crate::clock::DateKey;
use crate::shared::{AppError, AppState};

const DEFAULT_ATTEMPT_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressQuery {
    pub date_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AttemptsQuery {
    pub limit: Option<usize>,
}

/// POST /commits
#[instrument(name = "commit", skip(state, user, request), fields(uid = %user.uid))]
pub async fn commit(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CommitRequest>,
) -> Result<Json<CommitReceipt>, AppError> {
    let receipt = state.score_service.commit(&user, &request).await?;
    Ok(Json(receipt))
}

/// GET /me/progress?dateKey=YYYY-MM-DD
#[instrument(name = "progress", skip(state, user), fields(uid = %user.uid))]
pub async fn progress(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<Progress>, AppError> {
    let date_key = match query.date_key {
        Some(raw) => DateKey::parse(&raw)
            .ok_or_else(|| AppError::BadRequest(format!("invalid dateKey: {raw}")))?,
        None => state.score_service.today(),
    };

    let progress = state.score_service.progress(&user.uid, &date_key).await?;
    Ok(Json(progress))
}

/// GET /me/attempts?limit=
#[instrument(name = "attempts", skip(state, user), fields(uid = %user.uid))]
pub async fn attempts(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<AttemptsQuery>,
) -> Result<Json<Vec<Attempt>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_ATTEMPT_LIMIT).clamp(1, 500);
    let attempts = state.score_service.attempts(&user.uid, limit).await?;
    Ok(Json(attempts))
}

/// DELETE /me/data
///
/// Wipes aggregates, board rows, attempts and tasks. The user record is kept.
#[instrument(name = "reset", skip(state, user), fields(uid = %user.uid))]
pub async fn reset(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<StatusCode, AppError> {
    state.task_service.delete_user(&user.uid).await?;
    state.score_service.reset_user(&user.uid).await?;

    info!("All progress data deleted");
    Ok(StatusCode::NO_CONTENT)
}
