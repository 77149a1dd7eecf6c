use axum::{
    extract::{ws::WebSocket, Path, Query, State, WebSocketUpgrade},
    response::Response,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::live::LiveBoard;
use super::models::{LeaderboardScope, LeaderboardSnapshot};
use crate::clock::DateKey;
use crate::score::{ScoreService, MAX_BOARD_LIMIT};
use crate::shared::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct BoardQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    /// `overall` or a `YYYY-MM-DD` day
    pub scope: String,
    pub limit: Option<usize>,
}

/// GET /leaderboard/daily/:date_key?limit=
#[instrument(name = "daily_board", skip(state))]
pub async fn daily_board(
    State(state): State<AppState>,
    Path(date_key): Path<String>,
    Query(query): Query<BoardQuery>,
) -> Result<Json<LeaderboardSnapshot>, AppError> {
    let date_key = DateKey::parse(&date_key)
        .ok_or_else(|| AppError::BadRequest(format!("invalid date key: {date_key}")))?;
    let limit = query.limit.unwrap_or(state.leaderboard_limit);

    let snapshot = state
        .score_service
        .leaderboard(&LeaderboardScope::Daily(date_key), limit)
        .await?;
    Ok(Json(snapshot))
}

/// GET /leaderboard/overall?limit=
#[instrument(name = "overall_board", skip(state))]
pub async fn overall_board(
    State(state): State<AppState>,
    Query(query): Query<BoardQuery>,
) -> Result<Json<LeaderboardSnapshot>, AppError> {
    let limit = query.limit.unwrap_or(state.leaderboard_limit);
    let snapshot = state
        .score_service
        .leaderboard(&LeaderboardScope::Overall, limit)
        .await?;
    Ok(Json(snapshot))
}

/// GET /leaderboard/live?scope=overall
///
/// Upgrades to a websocket that receives the board now and after every change.
#[instrument(name = "live_board", skip(state, ws))]
pub async fn live_board(
    State(state): State<AppState>,
    Query(query): Query<LiveQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let scope = LeaderboardScope::parse(&query.scope)
        .ok_or_else(|| AppError::BadRequest(format!("invalid scope: {}", query.scope)))?;
    let limit = query
        .limit
        .unwrap_or(state.leaderboard_limit)
        .clamp(1, MAX_BOARD_LIMIT);

    info!(scope = %scope, limit, "Live leaderboard connection");
    let scores = state.score_service.clone();
    Ok(ws.on_upgrade(move |socket| stream_board(socket, scores, scope, limit)))
}

async fn stream_board(
    socket: WebSocket,
    scores: Arc<ScoreService>,
    scope: LeaderboardScope,
    limit: usize,
) {
    // Subscribe before the first read so no change slips between the two
    let updates = scores.feed().subscribe(&scope).await;
    let initial = match scores.leaderboard(&scope, limit).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(scope = %scope, error = %e, "Could not load board for live stream");
            return;
        }
    };

    if let Err(e) = LiveBoard::new(scope.clone(), limit, Box::new(socket), updates)
        .run(initial)
        .await
    {
        warn!(scope = %scope, error = %e, "Live leaderboard connection ended with error");
    }
    scores.feed().prune().await;
}
