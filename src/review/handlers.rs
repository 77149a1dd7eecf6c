use axum::{extract::State, Json};
use serde_json::Value;
use tracing::{info, instrument};

use super::models::{GrammarReview, GrammarReviewRequest};
use super::ReviewError;
use crate::shared::{AppError, AppState};

/// POST /api/grammar-review
#[instrument(name = "grammar_review", skip(state, request))]
pub async fn grammar_review(
    State(state): State<AppState>,
    Json(request): Json<GrammarReviewRequest>,
) -> Result<Json<GrammarReview>, AppError> {
    let prompt = request.into_prompt()?;
    let reviewer = state
        .reviewer
        .as_ref()
        .ok_or_else(|| ReviewError::Misconfigured("no API key".to_string()))?;

    let raw = reviewer.judge(&prompt).await?;
    let parsed: Value = serde_json::from_str(&raw)
        .map_err(|e| ReviewError::BadModelOutput(e.to_string()))?;
    let review = GrammarReview::sanitize(&parsed)?;

    info!(is_correct = review.is_correct, score = review.score, "Grammar review done");
    Ok(Json(review))
}
