pub mod rules;

pub use rules::{apply_deltas, compute_score, is_consistent, on_answer, on_task_toggle, outstanding};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Score weight of one completed task
pub const TASK_BONUS: i64 = 10;

/// Practice direction of an answered card
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AnswerMode {
    JpEn,
    EnJp,
    Grammar,
}

/// Counter changes produced by a single answer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnswerDelta {
    pub jp_en: i64,
    pub en_jp: i64,
    pub grammar: i64,
    pub correct: i64,
    pub wrong: i64,
}

/// The authoritative counters of an aggregate. `score` is never stored here;
/// it is always derived with [`compute_score`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub jp_en_correct: i64,
    pub en_jp_correct: i64,
    pub grammar_correct: i64,
    pub tasks_completed: i64,
}

impl Counters {
    pub fn score(&self) -> i64 {
        compute_score(
            self.jp_en_correct,
            self.en_jp_correct,
            self.grammar_correct,
            self.tasks_completed,
        )
    }
}

/// Signed changes to apply to an aggregate's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreDeltas {
    pub jp_en_correct: i64,
    pub en_jp_correct: i64,
    pub grammar_correct: i64,
    pub tasks_completed: i64,
}

impl ScoreDeltas {
    pub fn tasks(delta: i64) -> Self {
        Self {
            tasks_completed: delta,
            ..Self::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl From<AnswerTally> for ScoreDeltas {
    fn from(tally: AnswerTally) -> Self {
        Self {
            jp_en_correct: tally.jp_en_correct,
            en_jp_correct: tally.en_jp_correct,
            grammar_correct: tally.grammar_correct,
            tasks_completed: 0,
        }
    }
}

/// Correct-answer counts for one day of a practice run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerTally {
    pub jp_en_correct: i64,
    pub en_jp_correct: i64,
    pub grammar_correct: i64,
}

impl AnswerTally {
    pub fn add(&mut self, delta: &AnswerDelta) {
        self.jp_en_correct += delta.jp_en;
        self.en_jp_correct += delta.en_jp;
        self.grammar_correct += delta.grammar;
    }

    pub fn correct(&self) -> i64 {
        self.jp_en_correct
            .saturating_add(self.en_jp_correct)
            .saturating_add(self.grammar_correct)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Field-wise `self - other`, floored at zero
    pub fn saturating_sub(&self, other: &AnswerTally) -> AnswerTally {
        AnswerTally {
            jp_en_correct: self.jp_en_correct.saturating_sub(other.jp_en_correct).max(0),
            en_jp_correct: self.en_jp_correct.saturating_sub(other.en_jp_correct).max(0),
            grammar_correct: self.grammar_correct.saturating_sub(other.grammar_correct).max(0),
        }
    }

    /// Field-wise maximum
    pub fn high_water(&self, other: &AnswerTally) -> AnswerTally {
        AnswerTally {
            jp_en_correct: self.jp_en_correct.max(other.jp_en_correct),
            en_jp_correct: self.en_jp_correct.max(other.en_jp_correct),
            grammar_correct: self.grammar_correct.max(other.grammar_correct),
        }
    }
}
