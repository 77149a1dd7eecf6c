use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::generators::DisplayNameGenerator;
use crate::auth::TokenConfig;
use crate::review::{GrammarReviewer, ReviewError};
use crate::score::{CommitError, ScoreService};
use crate::store::StoreError;
use crate::task::{TaskError, TaskService};

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub token_config: TokenConfig,
    pub display_names: Arc<dyn DisplayNameGenerator>,
    pub score_service: Arc<ScoreService>,
    pub task_service: Arc<TaskService>,
    /// Absent when no OpenAI key is configured
    pub reviewer: Option<Arc<dyn GrammarReviewer>>,
    pub leaderboard_limit: usize,
}

impl AppState {
    pub fn new(
        token_config: TokenConfig,
        display_names: Arc<dyn DisplayNameGenerator>,
        score_service: Arc<ScoreService>,
        task_service: Arc<TaskService>,
        reviewer: Option<Arc<dyn GrammarReviewer>>,
    ) -> Self {
        let leaderboard_limit = score_service.board_limit();
        Self {
            token_config,
            display_names,
            score_service,
            task_service,
            reviewer,
            leaderboard_limit,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("JWT error: {0}")]
    JwtError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Upstream error: {detail}")]
    Upstream { status: StatusCode, detail: String },

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(_) | StoreError::Conflict { .. } => {
                AppError::ServiceUnavailable(e.to_string())
            }
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::InvariantViolation(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<CommitError> for AppError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::NotAuthenticated => AppError::Unauthorized(e.to_string()),
            CommitError::InvalidRequest(msg) => AppError::BadRequest(msg),
            CommitError::Store(store) => store.into(),
        }
    }
}

impl From<TaskError> for AppError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::InvalidRequest(msg) => AppError::BadRequest(msg),
            TaskError::Store(store) => store.into(),
        }
    }
}

impl From<ReviewError> for AppError {
    fn from(e: ReviewError) -> Self {
        match e {
            ReviewError::InvalidRequest(msg) => AppError::BadRequest(msg),
            ReviewError::Misconfigured(_) => AppError::Internal(e.to_string()),
            ReviewError::Upstream { status, detail } => AppError::Upstream {
                status: status
                    .and_then(|code| StatusCode::from_u16(code).ok())
                    .filter(|code| !code.is_success())
                    .unwrap_or(StatusCode::BAD_GATEWAY),
                detail,
            },
            ReviewError::BadModelOutput(_) => AppError::Upstream {
                status: StatusCode::BAD_GATEWAY,
                detail: e.to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::JwtError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Upstream { status, detail } => {
                let body = Json(json!({
                    "error": "Upstream request failed",
                    "detail": detail
                }));
                return (status, body).into_response();
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use crate::aggregate::InMemoryAggregateRepository;
    use crate::auth::generators::PetNameGenerator;
    use crate::task::InMemoryTaskRepository;

    pub const TEST_SECRET: &str = "test-secret";

    /// Builder for creating AppState with in-memory services for testing
    pub struct AppStateBuilder {
        score_service: Option<Arc<ScoreService>>,
        reviewer: Option<Arc<dyn GrammarReviewer>>,
    }

    impl AppStateBuilder {
        pub fn new() -> Self {
            Self {
                score_service: None,
                reviewer: None,
            }
        }

        pub fn with_score_service(mut self, service: Arc<ScoreService>) -> Self {
            self.score_service = Some(service);
            self
        }

        pub fn with_reviewer(mut self, reviewer: Arc<dyn GrammarReviewer>) -> Self {
            self.reviewer = Some(reviewer);
            self
        }

        pub fn build(self) -> AppState {
            let score_service = self.score_service.unwrap_or_else(|| {
                Arc::new(ScoreService::builder(Arc::new(InMemoryAggregateRepository::new())).build())
            });
            let task_service = Arc::new(TaskService::new(
                Arc::new(InMemoryTaskRepository::new()),
                score_service.clone(),
            ));

            AppState::new(
                TokenConfig::new(TEST_SECRET, 1),
                Arc::new(PetNameGenerator::new()),
                score_service,
                task_service,
                self.reviewer,
            )
        }
    }

    impl Default for AppStateBuilder {
        fn default() -> Self {
            Self::new()
        }
    }
}
