use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

use super::setup::TestSetup;

// ============================================================================
// Action Helpers
// ============================================================================

/// A signed-in learner as seen by the tests
#[derive(Debug, Clone)]
pub struct Learner {
    pub uid: String,
    pub token: String,
}

impl TestSetup {
    /// Send a request through the full router and decode the JSON body (Null when empty)
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// Signs in as a new learner; the server picks the uid
    pub async fn sign_in(&self, display_name: &str) -> Learner {
        let (status, body) = self
            .send(
                "POST",
                "/session",
                None,
                Some(json!({ "displayName": display_name })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "sign-in failed: {body}");
        Learner {
            uid: body["uid"].as_str().unwrap().to_string(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    pub async fn commit(&self, learner: &Learner, body: Value) -> (StatusCode, Value) {
        self.send("POST", "/commits", Some(&learner.token), Some(body))
            .await
    }

    pub async fn progress(&self, learner: &Learner, date_key: &str) -> Value {
        let (status, body) = self
            .send(
                "GET",
                &format!("/me/progress?dateKey={date_key}"),
                Some(&learner.token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "progress failed: {body}");
        body
    }

    pub async fn daily_board(&self, date_key: &str) -> Value {
        let (status, body) = self
            .send("GET", &format!("/leaderboard/daily/{date_key}"), None, None)
            .await;
        assert_eq!(status, StatusCode::OK, "daily board failed: {body}");
        body
    }

    pub async fn overall_board(&self) -> Value {
        let (status, body) = self.send("GET", "/leaderboard/overall", None, None).await;
        assert_eq!(status, StatusCode::OK, "overall board failed: {body}");
        body
    }
}

/// Commit body for a jp-en run with every correct answer on one day
pub fn commit_body(commit_id: &str, date_key: &str, correct: i64, wrong: i64) -> Value {
    json!({
        "commitId": commit_id,
        "sessionId": "0b7d5c1e-2a44-4f5e-8c3b-5d6e7f8a9b0c",
        "deckName": "n5-verbs",
        "mode": "jp-en",
        "correct": correct,
        "wrong": wrong,
        "skipped": 0,
        "total": correct + wrong,
        "days": [
            { "dateKey": date_key, "jpEnCorrect": correct, "enJpCorrect": 0, "grammarCorrect": 0 }
        ],
        "clientCreatedAt": "2024-05-01T01:00:00Z"
    })
}
