use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::models::ReviewPrompt;
use super::ReviewError;

pub const DEFAULT_REVIEW_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You are a Japanese grammar checker for JLPT N5 learners. \
You will receive: the question/prompt, the learner's answer, and a reference correct answer (for guidance). \
Evaluate if the learner's answer is acceptable for N5 level. \
Allow small variations if they are correct in Japanese. \
Return ONLY JSON with keys: \
is_correct (bool), verdict (short string ≤120 chars), better (corrected version), \
issues (array of bullet points), score (0..1).";

/// Judges a learner's answer. Returns the model's raw JSON text; shaping it
/// into a response is left to the caller.
#[async_trait]
pub trait GrammarReviewer: Send + Sync {
    async fn judge(&self, prompt: &ReviewPrompt) -> Result<String, ReviewError>;
}

#[derive(Clone)]
pub struct OpenAiGrammarReviewer {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiGrammarReviewer {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    pub fn from_api_key(api_key: &str, model: &str) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self::new(Client::with_config(config), model.to_string())
    }
}

/// HTTP status the upstream answered with, when it can be recovered from the error
fn upstream_status(e: &OpenAIError) -> Option<u16> {
    match e {
        OpenAIError::Reqwest(inner) => inner.status().map(|status| status.as_u16()),
        OpenAIError::ApiError(api) => {
            let code = api.code.as_deref().unwrap_or_default();
            let kind = api.r#type.as_deref().unwrap_or_default();
            match (code, kind) {
                ("rate_limit_exceeded" | "insufficient_quota", _) | (_, "tokens" | "requests") => {
                    Some(429)
                }
                ("invalid_api_key", _) | (_, "authentication_error") => Some(401),
                (_, "permission_error" | "insufficient_permissions") => Some(403),
                ("model_not_found", _) => Some(404),
                (_, "invalid_request_error") => Some(400),
                (_, "server_error") => Some(500),
                _ => None,
            }
        }
        _ => None,
    }
}

fn build_error(e: OpenAIError) -> ReviewError {
    if let OpenAIError::InvalidArgument(reason) = &e {
        return ReviewError::Misconfigured(reason.clone());
    }
    ReviewError::Upstream {
        status: upstream_status(&e),
        detail: e.to_string(),
    }
}

#[async_trait]
impl GrammarReviewer for OpenAiGrammarReviewer {
    #[instrument(skip(self, prompt), fields(model = %self.model))]
    async fn judge(&self, prompt: &ReviewPrompt) -> Result<String, ReviewError> {
        let user_content = serde_json::to_string(prompt)
            .map_err(|e| ReviewError::InvalidRequest(e.to_string()))?;

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_PROMPT)
                .build()
                .map_err(build_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_content)
                .build()
                .map_err(build_error)?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .response_format(ResponseFormat::JsonObject)
            .n(1)
            .build()
            .map_err(build_error)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!(error = %e, "Grammar review request failed");
            build_error(e)
        })?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ReviewError::BadModelOutput("model returned no content".to_string()))?;

        debug!(bytes = content.len(), "Grammar review received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::ApiError;

    fn api_error(code: Option<&str>, kind: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: "upstream said no".to_string(),
            r#type: kind.map(str::to_string),
            param: None,
            code: code.map(str::to_string),
        })
    }

    fn status_of(error: ReviewError) -> Option<u16> {
        match error {
            ReviewError::Upstream { status, .. } => status,
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[test]
    fn api_errors_keep_their_http_status() {
        let cases = [
            (Some("rate_limit_exceeded"), Some("requests"), Some(429)),
            (Some("insufficient_quota"), Some("insufficient_quota"), Some(429)),
            (Some("invalid_api_key"), Some("invalid_request_error"), Some(401)),
            (None, Some("authentication_error"), Some(401)),
            (Some("model_not_found"), Some("invalid_request_error"), Some(404)),
            (None, Some("invalid_request_error"), Some(400)),
            (None, Some("server_error"), Some(500)),
            (None, None, None),
        ];
        for (code, kind, expected) in cases {
            assert_eq!(
                status_of(build_error(api_error(code, kind))),
                expected,
                "code={code:?} type={kind:?}"
            );
        }
    }

    #[test]
    fn builder_errors_are_configuration_problems() {
        let error = build_error(OpenAIError::InvalidArgument("model missing".to_string()));
        assert!(matches!(error, ReviewError::Misconfigured(_)));
    }
}
