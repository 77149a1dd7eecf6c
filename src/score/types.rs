use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

use crate::aggregate::{DailyAggregate, OverallAggregate};
use crate::clock::DateKey;
use crate::scoring::{AnswerMode, AnswerTally, Counters};
use crate::store::StoreError;

/// Upper bound for any single count in one commit; far above a real practice run
pub const MAX_RUN_COUNT: i64 = 100_000;

/// Correct answers of a run that fell on one local day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayTally {
    pub date_key: DateKey,
    #[serde(flatten)]
    pub tally: AnswerTally,
}

/// A snapshot of a practice buffer, sent to be folded into the aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    /// Idempotency key; stays the same across retries of the same counts
    pub commit_id: Uuid,
    pub session_id: Uuid,
    pub deck_name: String,
    pub mode: AnswerMode,
    pub correct: i64,
    pub wrong: i64,
    pub skipped: i64,
    pub total: i64,
    #[serde(default)]
    pub days: Vec<DayTally>,
    pub client_created_at: DateTime<Utc>,
}

impl CommitRequest {
    pub fn answer_tally(&self) -> AnswerTally {
        self.days.iter().fold(AnswerTally::default(), |mut sum, day| {
            sum.jp_en_correct = sum.jp_en_correct.saturating_add(day.tally.jp_en_correct);
            sum.en_jp_correct = sum.en_jp_correct.saturating_add(day.tally.en_jp_correct);
            sum.grammar_correct = sum.grammar_correct.saturating_add(day.tally.grammar_correct);
            sum
        })
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn validate(&self) -> Result<(), CommitError> {
        let counts = [self.correct, self.wrong, self.skipped, self.total];
        if counts.iter().any(|count| *count < 0) {
            return Err(CommitError::InvalidRequest(
                "counts must not be negative".to_string(),
            ));
        }
        if counts.iter().any(|count| *count > MAX_RUN_COUNT) {
            return Err(CommitError::InvalidRequest(format!(
                "counts must not exceed {MAX_RUN_COUNT}"
            )));
        }
        if self.total != self.correct + self.wrong + self.skipped {
            return Err(CommitError::InvalidRequest(format!(
                "total {} does not equal correct + wrong + skipped ({} + {} + {})",
                self.total, self.correct, self.wrong, self.skipped
            )));
        }

        let mut seen = HashSet::new();
        for day in &self.days {
            let tally = &day.tally;
            let fields = [tally.jp_en_correct, tally.en_jp_correct, tally.grammar_correct];
            if fields.iter().any(|count| !(0..=MAX_RUN_COUNT).contains(count)) {
                return Err(CommitError::InvalidRequest(format!(
                    "tally for {} out of range",
                    day.date_key
                )));
            }
            if !seen.insert(&day.date_key) {
                return Err(CommitError::InvalidRequest(format!(
                    "date key {} appears twice",
                    day.date_key
                )));
            }
        }

        let per_direction = self.answer_tally().correct();
        if per_direction != self.correct {
            return Err(CommitError::InvalidRequest(format!(
                "correct {} does not equal the per-direction sum {}",
                self.correct, per_direction
            )));
        }
        Ok(())
    }
}

/// Result of a successful commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    pub commit_id: Uuid,
    pub daily: Vec<DailyAggregate>,
    /// Absent when the run had no correct answers to apply
    pub overall: Option<OverallAggregate>,
    pub attempt_recorded: bool,
    /// Every bucket had already been applied under this commit id
    pub replayed: bool,
}

impl CommitReceipt {
    pub fn empty(commit_id: Uuid) -> Self {
        Self {
            commit_id,
            daily: Vec::new(),
            overall: None,
            attempt_recorded: false,
            replayed: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid commit: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CommitError {
    /// Whether keeping the buffer and trying again later can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            CommitError::NotAuthenticated => true,
            CommitError::InvalidRequest(_) => false,
            CommitError::Store(e) => e.is_transient(),
        }
    }
}

/// Counters and score of one aggregate, zeros when it does not exist yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressTotals {
    #[serde(flatten)]
    pub counters: Counters,
    pub score: i64,
}

/// The caller's standing for a day and overall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub date_key: DateKey,
    pub daily: ProgressTotals,
    pub overall: ProgressTotals,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CommitRequest {
        CommitRequest {
            commit_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            deck_name: "n5-nouns".to_string(),
            mode: AnswerMode::JpEn,
            correct: 7,
            wrong: 2,
            skipped: 1,
            total: 10,
            days: vec![DayTally {
                date_key: DateKey::parse("2024-05-01").unwrap(),
                tally: AnswerTally {
                    jp_en_correct: 4,
                    en_jp_correct: 3,
                    grammar_correct: 0,
                },
            }],
            client_created_at: Utc::now(),
        }
    }

    #[test]
    fn consistent_request_validates() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn total_must_add_up() {
        let mut bad = request();
        bad.total = 11;
        assert!(matches!(bad.validate(), Err(CommitError::InvalidRequest(_))));
    }

    #[test]
    fn per_direction_sum_must_match_correct() {
        let mut bad = request();
        bad.days[0].tally.jp_en_correct = 5;
        assert!(matches!(bad.validate(), Err(CommitError::InvalidRequest(_))));
    }

    #[test]
    fn oversized_counts_are_rejected_without_overflow() {
        let mut bad = request();
        bad.correct = i64::MAX;
        bad.wrong = i64::MAX;
        bad.skipped = 2;
        bad.total = 0;
        assert!(matches!(bad.validate(), Err(CommitError::InvalidRequest(_))));

        let mut bad = request();
        bad.days[0].tally.jp_en_correct = i64::MAX;
        bad.days[0].tally.en_jp_correct = i64::MAX;
        assert!(matches!(bad.validate(), Err(CommitError::InvalidRequest(_))));
    }

    #[test]
    fn duplicate_days_are_rejected() {
        let mut bad = request();
        let mut second = bad.days[0].clone();
        second.tally = AnswerTally::default();
        bad.days.push(second);
        assert!(matches!(bad.validate(), Err(CommitError::InvalidRequest(_))));
    }

    #[test]
    fn wire_form_is_camel_case() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["deckName"], "n5-nouns");
        assert_eq!(json["mode"], "jp-en");
        assert_eq!(json["days"][0]["dateKey"], "2024-05-01");
        assert_eq!(json["days"][0]["enJpCorrect"], 3);
    }
}
