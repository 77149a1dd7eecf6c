use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ReviewError;

pub const DEFAULT_LEVEL: &str = "JLPT N5";
pub const MAX_VERDICT_CHARS: usize = 120;
pub const MAX_ISSUES: usize = 6;

/// Body of `POST /api/grammar-review`. Fields are loose so that bad input
/// can be answered with a 400 instead of a deserialization rejection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrammarReviewRequest {
    pub question: Option<String>,
    pub user_answer: Option<Value>,
    pub correct_answer: Option<String>,
    pub level: Option<String>,
}

/// What the model is asked to judge
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPrompt {
    pub question: String,
    pub user_answer: String,
    pub correct_answer: Option<String>,
    pub level: String,
}

impl GrammarReviewRequest {
    pub fn into_prompt(self) -> Result<ReviewPrompt, ReviewError> {
        let question = self
            .question
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ReviewError::InvalidRequest("Missing required fields".to_string()))?;
        let user_answer = match self.user_answer {
            Some(Value::String(answer)) => answer,
            _ => {
                return Err(ReviewError::InvalidRequest(
                    "Missing required fields".to_string(),
                ))
            }
        };

        Ok(ReviewPrompt {
            question,
            user_answer,
            correct_answer: self.correct_answer,
            level: self
                .level
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| DEFAULT_LEVEL.to_string()),
        })
    }
}

/// Sanitized verdict returned to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrammarReview {
    pub is_correct: bool,
    pub verdict: String,
    pub better: String,
    pub issues: Vec<String>,
    pub score: f64,
}

impl GrammarReview {
    /// Coerces whatever the model produced into the fixed response shape.
    /// Anything that is not a JSON object is rejected.
    pub fn sanitize(raw: &Value) -> Result<Self, ReviewError> {
        let fields = raw
            .as_object()
            .ok_or_else(|| ReviewError::BadModelOutput("model output is not an object".to_string()))?;
        let field = |name: &str| fields.get(name).unwrap_or(&Value::Null);

        let issues = match field("issues") {
            Value::Array(items) => items.iter().take(MAX_ISSUES).map(text_of).collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            is_correct: truthy(field("is_correct")),
            verdict: text_of(field("verdict"))
                .chars()
                .take(MAX_VERDICT_CHARS)
                .collect(),
            better: text_of(field("better")),
            issues,
            score: score_of(field("score")),
        })
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text form of a field; falsy values become empty
fn text_of(value: &Value) -> String {
    if !truthy(value) {
        return String::new();
    }
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn score_of(value: &Value) -> f64 {
    let score = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => 0.0,
    };
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
