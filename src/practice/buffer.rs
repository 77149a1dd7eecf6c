use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::clock::DateKey;
use crate::score::{CommitRequest, DayTally};
use crate::scoring::{self, AnswerDelta, AnswerMode, AnswerTally};

/// Answer counts of the current practice run that have not been committed yet.
///
/// Counts are cumulative under `commit_id`: a failed commit keeps the id and the
/// next attempt sends everything again, letting the store apply only what is new.
/// Correct answers are also bucketed per local day so a run across midnight
/// scores on both days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBuffer {
    pub session_id: Uuid,
    pub commit_id: Uuid,
    pub deck_name: String,
    pub mode: AnswerMode,
    pub correct: i64,
    pub wrong: i64,
    pub skipped: i64,
    pub total: i64,
    pub jp_en_correct: i64,
    pub en_jp_correct: i64,
    pub grammar_correct: i64,
    #[serde(default)]
    pub days: BTreeMap<DateKey, AnswerTally>,
    pub started_at: DateTime<Utc>,
}

impl SessionBuffer {
    pub fn new(deck_name: &str, mode: AnswerMode, at: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            commit_id: Uuid::new_v4(),
            deck_name: deck_name.to_string(),
            mode,
            correct: 0,
            wrong: 0,
            skipped: 0,
            total: 0,
            jp_en_correct: 0,
            en_jp_correct: 0,
            grammar_correct: 0,
            days: BTreeMap::new(),
            started_at: at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn record_answer(&mut self, mode: AnswerMode, is_correct: bool, date_key: DateKey) -> AnswerDelta {
        let delta = scoring::on_answer(mode, is_correct);

        self.correct += delta.correct;
        self.wrong += delta.wrong;
        self.total += 1;
        self.jp_en_correct += delta.jp_en;
        self.en_jp_correct += delta.en_jp;
        self.grammar_correct += delta.grammar;
        if delta.correct > 0 {
            self.days.entry(date_key).or_default().add(&delta);
        }
        delta
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
        self.total += 1;
    }

    pub fn to_commit_request(&self, client_created_at: DateTime<Utc>) -> CommitRequest {
        CommitRequest {
            commit_id: self.commit_id,
            session_id: self.session_id,
            deck_name: self.deck_name.clone(),
            mode: self.mode,
            correct: self.correct,
            wrong: self.wrong,
            skipped: self.skipped,
            total: self.total,
            days: self
                .days
                .iter()
                .map(|(date_key, tally)| DayTally {
                    date_key: date_key.clone(),
                    tally: *tally,
                })
                .collect(),
            client_created_at,
        }
    }

    /// Removes the counts of `committed` (an earlier copy of this buffer) and
    /// starts a new commit id. Answers recorded after the copy was taken stay.
    pub fn settle(&mut self, committed: &SessionBuffer) {
        self.correct = (self.correct - committed.correct).max(0);
        self.wrong = (self.wrong - committed.wrong).max(0);
        self.skipped = (self.skipped - committed.skipped).max(0);
        self.total = (self.total - committed.total).max(0);
        self.jp_en_correct = (self.jp_en_correct - committed.jp_en_correct).max(0);
        self.en_jp_correct = (self.en_jp_correct - committed.en_jp_correct).max(0);
        self.grammar_correct = (self.grammar_correct - committed.grammar_correct).max(0);

        for (date_key, done) in &committed.days {
            if let Some(tally) = self.days.get_mut(date_key) {
                *tally = tally.saturating_sub(done);
            }
        }
        self.days.retain(|_, tally| !tally.is_zero());
        self.commit_id = Uuid::new_v4();
    }

    /// Both counter identities hold
    pub fn is_consistent(&self) -> bool {
        self.total == self.correct + self.wrong + self.skipped
            && self.correct == self.jp_en_correct + self.en_jp_correct + self.grammar_correct
    }
}
