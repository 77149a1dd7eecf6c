pub mod handlers;
pub mod models;
pub mod reviewer;

pub use handlers::grammar_review;
pub use models::{GrammarReview, GrammarReviewRequest, ReviewPrompt};
pub use reviewer::{GrammarReviewer, OpenAiGrammarReviewer, DEFAULT_REVIEW_MODEL};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Server misconfigured: {0}")]
    Misconfigured(String),

    /// `status` is known only when the upstream answered with an HTTP error
    #[error("OpenAI request failed: {detail}")]
    Upstream { status: Option<u16>, detail: String },

    #[error("Bad model output: {0}")]
    BadModelOutput(String),
}
