use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::DateKey;
use crate::scoring::{self, AnswerTally, Counters, ScoreDeltas};
use crate::store::StoreError;

/// Counter block shared by the daily and overall aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateTotals {
    #[serde(flatten)]
    pub counters: Counters,
    pub score: i64,
    pub display_name: String,
    /// Bumped on every write; leaderboard rows only accept newer versions
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl AggregateTotals {
    pub fn empty(display_name: &str, at: DateTime<Utc>) -> Self {
        Self {
            counters: Counters::default(),
            score: 0,
            display_name: display_name.to_string(),
            version: 0,
            updated_at: at,
        }
    }

    /// Next state after `deltas`, with the score re-derived from the new counters
    pub fn advance(
        &self,
        deltas: &ScoreDeltas,
        display_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let counters = scoring::apply_deltas(&self.counters, deltas);
        let next = Self {
            counters,
            score: counters.score(),
            display_name: display_name
                .map(str::to_string)
                .unwrap_or_else(|| self.display_name.clone()),
            version: self.version + 1,
            updated_at: at,
        };

        if !scoring::is_consistent(&next.counters, next.score) {
            return Err(StoreError::InvariantViolation(format!(
                "score {} does not match counters {:?}",
                next.score, next.counters
            )));
        }
        Ok(next)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAggregate {
    pub uid: String,
    pub date_key: DateKey,
    #[serde(flatten)]
    pub totals: AggregateTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallAggregate {
    pub uid: String,
    #[serde(flatten)]
    pub totals: AggregateTotals,
}

/// One call to the aggregate store: apply `deltas` to the user's aggregate for
/// `date_key` and to their overall aggregate.
#[derive(Debug, Clone)]
pub struct ApplyDeltas {
    pub uid: String,
    pub date_key: DateKey,
    pub deltas: ScoreDeltas,
    /// Stamped onto aggregates created by this call
    pub display_name: String,
    /// Also overwrite the name on aggregates that already exist
    pub refresh_display_name: bool,
    /// Idempotency key. When present, the answer counters in `deltas` are the
    /// cumulative amount for this key and only the part not yet applied lands.
    pub commit_key: Option<String>,
    pub at: DateTime<Utc>,
}

impl ApplyDeltas {
    pub fn new(uid: &str, date_key: DateKey, deltas: ScoreDeltas, display_name: &str) -> Self {
        Self {
            uid: uid.to_string(),
            date_key,
            deltas,
            display_name: display_name.to_string(),
            refresh_display_name: false,
            commit_key: None,
            at: Utc::now(),
        }
    }

    pub fn with_commit_key(mut self, key: impl Into<String>) -> Self {
        self.commit_key = Some(key.into());
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    fn requested_tally(&self) -> AnswerTally {
        AnswerTally {
            jp_en_correct: self.deltas.jp_en_correct,
            en_jp_correct: self.deltas.en_jp_correct,
            grammar_correct: self.deltas.grammar_correct,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedAggregates {
    pub daily: DailyAggregate,
    pub overall: OverallAggregate,
    /// What actually landed after idempotency filtering
    pub applied: ScoreDeltas,
    /// The commit key had already been fully applied
    pub replayed: bool,
}

/// The writes a single `apply_deltas` resolves to, computed from one consistent read
#[derive(Debug, Clone)]
pub struct ApplyPlan {
    pub daily: DailyAggregate,
    pub overall: OverallAggregate,
    pub applied: ScoreDeltas,
    pub replayed: bool,
    /// New high-water mark to record under the commit key
    pub commit_mark: Option<AnswerTally>,
}

impl ApplyPlan {
    pub fn resolve(
        request: &ApplyDeltas,
        daily: Option<&DailyAggregate>,
        overall: Option<&OverallAggregate>,
        already_applied: Option<&AnswerTally>,
    ) -> Result<Self, StoreError> {
        let (applied, commit_mark, replayed) = match &request.commit_key {
            Some(_) => {
                let requested = request.requested_tally();
                let remaining = scoring::outstanding(&requested, already_applied);
                let mark = already_applied
                    .map(|prev| prev.high_water(&requested))
                    .unwrap_or(requested);
                let mut applied = ScoreDeltas::from(remaining);
                applied.tasks_completed = request.deltas.tasks_completed;
                let replayed = already_applied.is_some() && applied.is_zero();
                (applied, Some(mark), replayed)
            }
            None => (request.deltas, None, false),
        };

        let refresh = request
            .refresh_display_name
            .then_some(request.display_name.as_str());

        let daily_totals = daily
            .map(|d| d.totals.clone())
            .unwrap_or_else(|| AggregateTotals::empty(&request.display_name, request.at));
        let overall_totals = overall
            .map(|o| o.totals.clone())
            .unwrap_or_else(|| AggregateTotals::empty(&request.display_name, request.at));

        Ok(Self {
            daily: DailyAggregate {
                uid: request.uid.clone(),
                date_key: request.date_key.clone(),
                totals: daily_totals.advance(&applied, refresh, request.at)?,
            },
            overall: OverallAggregate {
                uid: request.uid.clone(),
                totals: overall_totals.advance(&applied, refresh, request.at)?,
            },
            applied,
            replayed,
            commit_mark,
        })
    }

    pub fn into_applied(self) -> AppliedAggregates {
        AppliedAggregates {
            daily: self.daily,
            overall: self.overall,
            applied: self.applied,
            replayed: self.replayed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(deltas: ScoreDeltas) -> ApplyDeltas {
        ApplyDeltas::new("u1", DateKey::parse("2024-05-01").unwrap(), deltas, "Aiko")
    }

    #[test]
    fn missing_aggregates_start_at_zero_with_display_name() {
        let plan = ApplyPlan::resolve(
            &request(ScoreDeltas {
                jp_en_correct: 2,
                ..ScoreDeltas::default()
            }),
            None,
            None,
            None,
        )
        .unwrap();

        assert_eq!(plan.daily.totals.counters.jp_en_correct, 2);
        assert_eq!(plan.daily.totals.score, 2);
        assert_eq!(plan.daily.totals.display_name, "Aiko");
        assert_eq!(plan.daily.totals.version, 1);
        assert_eq!(plan.overall.totals.score, 2);
    }

    #[test]
    fn existing_display_name_kept_unless_refreshed() {
        let first = ApplyPlan::resolve(&request(ScoreDeltas::tasks(1)), None, None, None).unwrap();

        let mut renamed = request(ScoreDeltas::default());
        renamed.display_name = "Aiko S.".to_string();
        let kept =
            ApplyPlan::resolve(&renamed, Some(&first.daily), Some(&first.overall), None).unwrap();
        assert_eq!(kept.daily.totals.display_name, "Aiko");

        renamed.refresh_display_name = true;
        let refreshed =
            ApplyPlan::resolve(&renamed, Some(&first.daily), Some(&first.overall), None).unwrap();
        assert_eq!(refreshed.daily.totals.display_name, "Aiko S.");
        assert_eq!(refreshed.overall.totals.display_name, "Aiko S.");
    }

    #[test]
    fn zero_deltas_only_touch_bookkeeping() {
        let first = ApplyPlan::resolve(&request(ScoreDeltas::tasks(1)), None, None, None).unwrap();
        let touched = ApplyPlan::resolve(
            &request(ScoreDeltas::default()),
            Some(&first.daily),
            Some(&first.overall),
            None,
        )
        .unwrap();

        assert_eq!(touched.daily.totals.counters, first.daily.totals.counters);
        assert_eq!(touched.daily.totals.score, first.daily.totals.score);
        assert_eq!(touched.daily.totals.version, first.daily.totals.version + 1);
    }

    #[test]
    fn commit_key_applies_only_the_remainder() {
        let deltas = ScoreDeltas {
            jp_en_correct: 3,
            ..ScoreDeltas::default()
        };
        let already = AnswerTally {
            jp_en_correct: 2,
            ..AnswerTally::default()
        };
        let plan = ApplyPlan::resolve(
            &request(deltas).with_commit_key("c1:2024-05-01"),
            None,
            None,
            Some(&already),
        )
        .unwrap();

        assert_eq!(plan.applied.jp_en_correct, 1);
        assert!(!plan.replayed);
        assert_eq!(plan.commit_mark.unwrap().jp_en_correct, 3);
    }

    #[test]
    fn fully_applied_commit_key_is_a_replay() {
        let deltas = ScoreDeltas {
            en_jp_correct: 3,
            ..ScoreDeltas::default()
        };
        let already = AnswerTally {
            en_jp_correct: 3,
            ..AnswerTally::default()
        };
        let plan = ApplyPlan::resolve(
            &request(deltas).with_commit_key("c1:2024-05-01"),
            None,
            None,
            Some(&already),
        )
        .unwrap();

        assert!(plan.replayed);
        assert!(plan.applied.is_zero());
        assert_eq!(plan.daily.totals.counters.en_jp_correct, 0);
    }
}
