use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use n5study::{
    auth::AuthUser,
    practice::CommitTarget,
    score::{CommitError, CommitReceipt, CommitRequest},
    store::StoreError,
};

use super::actions::Learner;
use super::setup::TestSetup;

/// Commits a practice buffer over `POST /commits`, the way the browser client does.
/// `set_offline(true)` makes every call fail as a dropped connection would.
pub struct HttpCommitTarget {
    setup: TestSetup,
    learner: Learner,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl HttpCommitTarget {
    pub fn new(setup: TestSetup, learner: Learner) -> Self {
        Self {
            setup,
            learner,
            offline: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    #[allow(dead_code)]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommitTarget for HttpCommitTarget {
    async fn commit(
        &self,
        _user: &AuthUser,
        request: &CommitRequest,
    ) -> Result<CommitReceipt, CommitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(CommitError::Store(StoreError::Unavailable(
                "connection refused".to_string(),
            )));
        }

        let body = serde_json::to_value(request).unwrap();
        let (status, body) = self.setup.commit(&self.learner, body).await;
        match status {
            StatusCode::OK => Ok(serde_json::from_value(body).unwrap()),
            StatusCode::UNAUTHORIZED => Err(CommitError::NotAuthenticated),
            StatusCode::BAD_REQUEST => Err(CommitError::InvalidRequest(error_text(&body))),
            _ => Err(CommitError::Store(StoreError::Unavailable(error_text(&body)))),
        }
    }
}

fn error_text(body: &Value) -> String {
    body["error"].as_str().unwrap_or_default().to_string()
}
