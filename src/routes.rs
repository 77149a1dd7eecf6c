use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{jwt_auth, sign_in};
use crate::leaderboard::handlers::{daily_board, live_board, overall_board};
use crate::review::grammar_review;
use crate::score::handlers::{attempts, commit, progress, reset};
use crate::shared::AppState;
use crate::task::handlers::{add_task, delete_task, list_tasks, toggle_task};

/// Full HTTP surface. Everything under `/commits`, `/me` and `/tasks` needs a
/// bearer token from `POST /session`.
pub fn build_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/commits", post(commit))
        .route("/me/progress", get(progress))
        .route("/me/attempts", get(attempts))
        .route("/me/data", delete(reset))
        .route("/tasks/:date_key", get(list_tasks).post(add_task))
        .route("/tasks/:date_key/:task_id/toggle", post(toggle_task))
        .route("/tasks/:date_key/:task_id", delete(delete_task))
        .route_layer(middleware::from_fn_with_state(state.clone(), jwt_auth));

    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/session", post(sign_in))
        .route("/leaderboard/daily/:date_key", get(daily_board))
        .route("/leaderboard/overall", get(overall_board))
        .route("/leaderboard/live", get(live_board))
        .route("/api/grammar-review", post(grammar_review))
        .merge(authenticated)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
