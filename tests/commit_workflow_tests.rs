use axum::http::StatusCode;
use chrono::{Duration, FixedOffset};
use serde_json::json;
use std::sync::Arc;

use n5study::{
    auth::{AuthUser, StaticAuthProvider},
    clock::{Clock, ManualClock},
    practice::{CommitOutcome, FileScratch, SessionController, SessionPhase, SessionSlots},
    scoring::AnswerMode,
};

mod utils;

use utils::actions::{commit_body, Learner};
use utils::*;

const COMMIT_A: &str = "1c0d8e7a-6b5f-4e3d-9c2b-1a0f9e8d7c6b";
const COMMIT_B: &str = "2d1e9f8b-7c6a-4f4e-8d3c-2b1a0f9e8d7c";
const MAY_FIRST: &str = "2024-05-01";

fn tokyo() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

fn controller(
    target: Arc<HttpCommitTarget>,
    learner: &Learner,
    slots: SessionSlots,
    clock: Arc<ManualClock>,
) -> SessionController<FixedOffset> {
    let user = AuthUser {
        uid: learner.uid.clone(),
        display_name: "Aiko".to_string(),
    };
    SessionController::new(
        target,
        Arc::new(StaticAuthProvider::signed_in(user)),
        slots,
        clock,
        tokyo(),
    )
}

#[tokio::test]
async fn test_commit_requires_a_valid_token() {
    let setup = TestSetupBuilder::new().build();
    let body = commit_body(COMMIT_A, MAY_FIRST, 3, 1);

    let (status, _) = setup.send("POST", "/commits", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = setup
        .send("POST", "/commits", Some("not-a-token"), Some(body))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid or expired token");
}

#[tokio::test]
async fn test_commit_updates_progress_and_both_boards() {
    let setup = TestSetupBuilder::new().build();
    let aiko = setup.sign_in("Aiko").await;

    let (status, receipt) = setup.commit(&aiko, commit_body(COMMIT_A, MAY_FIRST, 6, 2)).await;
    assert_eq!(status, StatusCode::OK, "{receipt}");
    assert_eq!(receipt["replayed"], false);
    assert_eq!(receipt["attemptRecorded"], true);

    let progress = setup.progress(&aiko, MAY_FIRST).await;
    assert_eq!(progress["daily"]["score"], 6);
    assert_eq!(progress["daily"]["jpEnCorrect"], 6);
    assert_eq!(progress["overall"]["score"], 6);

    let daily = setup.daily_board(MAY_FIRST).await;
    assert_eq!(daily["entries"][0]["uid"], aiko.uid.as_str());
    assert_eq!(daily["entries"][0]["displayName"], "Aiko");
    assert_eq!(daily["entries"][0]["score"], 6);

    let overall = setup.overall_board().await;
    assert_eq!(overall["entries"][0]["score"], 6);

    let (status, attempts) = setup
        .send("GET", "/me/attempts", Some(&aiko.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attempts.as_array().unwrap().len(), 1);
    assert_eq!(attempts[0]["correct"], 6);
    assert_eq!(attempts[0]["wrong"], 2);
}

#[tokio::test]
async fn test_retried_commit_is_applied_once() {
    let setup = TestSetupBuilder::new().build();
    let aiko = setup.sign_in("Aiko").await;
    let body = commit_body(COMMIT_A, MAY_FIRST, 4, 0);

    let (first, _) = setup.commit(&aiko, body.clone()).await;
    let (second, receipt) = setup.commit(&aiko, body).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(receipt["replayed"], true);

    let progress = setup.progress(&aiko, MAY_FIRST).await;
    assert_eq!(progress["overall"]["score"], 4);

    // The same run grown by two answers only adds the difference
    let (status, _) = setup.commit(&aiko, commit_body(COMMIT_A, MAY_FIRST, 6, 0)).await;
    assert_eq!(status, StatusCode::OK);
    let progress = setup.progress(&aiko, MAY_FIRST).await;
    assert_eq!(progress["overall"]["score"], 6);

    let (_, attempts) = setup
        .send("GET", "/me/attempts", Some(&aiko.token), None)
        .await;
    assert_eq!(attempts.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_inconsistent_commit_is_rejected() {
    let setup = TestSetupBuilder::new().build();
    let aiko = setup.sign_in("Aiko").await;
    let mut body = commit_body(COMMIT_A, MAY_FIRST, 4, 1);
    body["total"] = json!(9);

    let (status, _) = setup.commit(&aiko, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let progress = setup.progress(&aiko, MAY_FIRST).await;
    assert_eq!(progress["overall"]["score"], 0);
}

#[tokio::test]
async fn test_board_ranks_by_score_then_uid() {
    let setup = TestSetupBuilder::new().build();
    let ben = setup.sign_in("Ben").await;
    let aiko = setup.sign_in("Aiko").await;
    let chie = setup.sign_in("Chie").await;

    setup.commit(&ben, commit_body(COMMIT_A, MAY_FIRST, 5, 0)).await;
    setup.commit(&aiko, commit_body(COMMIT_A, MAY_FIRST, 5, 0)).await;
    setup.commit(&chie, commit_body(COMMIT_A, MAY_FIRST, 9, 0)).await;

    let daily = setup.daily_board(MAY_FIRST).await;
    let order: Vec<&str> = daily["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["uid"].as_str().unwrap())
        .collect();
    // Equal scores fall back to uid order
    let mut tied = vec![aiko.uid.as_str(), ben.uid.as_str()];
    tied.sort();
    assert_eq!(order, vec![chie.uid.as_str(), tied[0], tied[1]]);

    let (status, limited) = setup
        .send("GET", "/leaderboard/overall?limit=1", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(limited["entries"].as_array().unwrap().len(), 1);
    assert_eq!(limited["entries"][0]["uid"], chie.uid.as_str());
}

#[tokio::test]
async fn test_fan_in_overall_sums_daily_rows() {
    let setup = TestSetupBuilder::new().with_fan_in_overall().build();
    let aiko = setup.sign_in("Aiko").await;

    setup.commit(&aiko, commit_body(COMMIT_A, "2024-05-01", 3, 0)).await;
    setup.commit(&aiko, commit_body(COMMIT_B, "2024-05-02", 4, 0)).await;

    let overall = setup.overall_board().await;
    assert_eq!(overall["entries"][0]["uid"], aiko.uid.as_str());
    assert_eq!(overall["entries"][0]["score"], 7);
}

#[tokio::test]
async fn test_task_toggle_adds_bonus_once() {
    let setup = TestSetupBuilder::new().build();
    let aiko = setup.sign_in("Aiko").await;

    let (status, task) = setup
        .send(
            "POST",
            &format!("/tasks/{MAY_FIRST}"),
            Some(&aiko.token),
            Some(json!({ "text": "Review katakana" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let toggle_uri = format!("/tasks/{MAY_FIRST}/{}/toggle", task["taskId"].as_str().unwrap());

    for _ in 0..2 {
        let (status, _) = setup
            .send("POST", &toggle_uri, Some(&aiko.token), Some(json!({ "done": true })))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let progress = setup.progress(&aiko, MAY_FIRST).await;
    assert_eq!(progress["daily"]["tasksCompleted"], 1);
    assert_eq!(progress["daily"]["score"], 10);

    let (_, _) = setup
        .send("POST", &toggle_uri, Some(&aiko.token), Some(json!({ "done": false })))
        .await;
    let progress = setup.progress(&aiko, MAY_FIRST).await;
    assert_eq!(progress["overall"]["score"], 0);
}

#[tokio::test]
async fn test_reset_wipes_progress_but_keeps_sign_in() {
    let setup = TestSetupBuilder::new().build();
    let aiko = setup.sign_in("Aiko").await;
    setup.commit(&aiko, commit_body(COMMIT_A, MAY_FIRST, 5, 0)).await;

    let (status, _) = setup
        .send("DELETE", "/me/data", Some(&aiko.token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let progress = setup.progress(&aiko, MAY_FIRST).await;
    assert_eq!(progress["overall"]["score"], 0);
    let daily = setup.daily_board(MAY_FIRST).await;
    assert!(daily["entries"].as_array().unwrap().is_empty());

    // The token still works and new practice counts from zero
    let (status, _) = setup.commit(&aiko, commit_body(COMMIT_B, MAY_FIRST, 2, 0)).await;
    assert_eq!(status, StatusCode::OK);
    let progress = setup.progress(&aiko, MAY_FIRST).await;
    assert_eq!(progress["overall"]["score"], 2);
}

#[tokio::test]
async fn test_practice_run_survives_an_outage() {
    let setup = TestSetupBuilder::new().build();
    let aiko = setup.sign_in("Aiko").await;
    let target = Arc::new(HttpCommitTarget::new(setup.clone(), aiko.clone()));
    let scratch = tempfile::tempdir().unwrap();
    let session = controller(
        target.clone(),
        &aiko,
        SessionSlots::new(Arc::new(FileScratch::new(scratch.path()))),
        setup.clock.clone(),
    );

    session.select_deck("n5-verbs", AnswerMode::EnJp).await;
    let now = setup.clock.now();
    session.record_answer(AnswerMode::EnJp, true, now).await.unwrap();
    session.record_answer(AnswerMode::EnJp, true, now).await.unwrap();
    session.record_answer(AnswerMode::EnJp, false, now).await.unwrap();

    target.set_offline(true);
    let outcome = session.save().await;
    assert!(matches!(outcome, CommitOutcome::Failed(ref notice) if notice.retryable));
    assert_eq!(session.phase().await, SessionPhase::PendingRetry);

    session.record_answer(AnswerMode::EnJp, true, now).await.unwrap();
    target.set_offline(false);
    assert!(matches!(session.save().await, CommitOutcome::Committed(_)));
    assert_eq!(session.phase().await, SessionPhase::Idle);

    let progress = setup.progress(&aiko, MAY_FIRST).await;
    assert_eq!(progress["daily"]["enJpCorrect"], 3);
    assert_eq!(progress["overall"]["score"], 3);

    // Nothing left to send
    assert!(matches!(session.save().await, CommitOutcome::NothingToCommit));
    assert_eq!(target.calls(), 2);
}

#[tokio::test]
async fn test_unloaded_run_is_recovered_once_after_restart() {
    let setup = TestSetupBuilder::new().build();
    let aiko = setup.sign_in("Aiko").await;
    let scratch = tempfile::tempdir().unwrap();
    let slots = || SessionSlots::new(Arc::new(FileScratch::new(scratch.path())));

    let before = controller(
        Arc::new(HttpCommitTarget::new(setup.clone(), aiko.clone())),
        &aiko,
        slots(),
        setup.clock.clone(),
    );
    before.select_deck("n5-particles", AnswerMode::Grammar).await;
    let now = setup.clock.now();
    for _ in 0..4 {
        before.record_answer(AnswerMode::Grammar, true, now).await.unwrap();
    }
    before.on_unload().await.unwrap();
    drop(before);

    setup.clock.advance(Duration::hours(1));
    let after = controller(
        Arc::new(HttpCommitTarget::new(setup.clone(), aiko.clone())),
        &aiko,
        slots(),
        setup.clock.clone(),
    );
    let restored = after.restore().await.unwrap().unwrap();
    assert_eq!(restored.total, 4);

    let outcomes = after.recover_pending().await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], CommitOutcome::Committed(_)));
    assert!(after.recover_pending().await.is_empty());

    // The restored buffer was settled by the recovery
    assert!(matches!(after.save().await, CommitOutcome::NothingToCommit));

    let progress = setup.progress(&aiko, MAY_FIRST).await;
    assert_eq!(progress["overall"]["grammarCorrect"], 4);
    assert_eq!(progress["overall"]["score"], 4);
}
