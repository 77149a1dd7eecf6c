use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use strum_macros::{Display, EnumString};

use crate::aggregate::{AggregateTotals, DailyAggregate, OverallAggregate};
use crate::clock::DateKey;
use crate::scoring::Counters;

const OVERALL_KEY: &str = "overall";

/// Which board an entry belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LeaderboardScope {
    Daily(DateKey),
    Overall,
}

impl LeaderboardScope {
    /// Storage key: the date key for daily boards, `overall` otherwise
    pub fn key(&self) -> &str {
        match self {
            LeaderboardScope::Daily(date_key) => date_key.as_str(),
            LeaderboardScope::Overall => OVERALL_KEY,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        if raw == OVERALL_KEY {
            return Some(LeaderboardScope::Overall);
        }
        DateKey::parse(raw).map(LeaderboardScope::Daily)
    }
}

impl fmt::Display for LeaderboardScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl TryFrom<String> for LeaderboardScope {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown leaderboard scope: {value}"))
    }
}

impl From<LeaderboardScope> for String {
    fn from(scope: LeaderboardScope) -> Self {
        scope.key().to_string()
    }
}

/// One row of a board; a denormalized copy of the user's aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub uid: String,
    #[serde(flatten)]
    pub counters: Counters,
    pub score: i64,
    pub display_name: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl LeaderboardEntry {
    /// Score descending, uid ascending
    pub fn rank_order(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
        b.score.cmp(&a.score).then_with(|| a.uid.cmp(&b.uid))
    }
}

/// Write of an aggregate's current state into a board
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorUpdate {
    pub scope: LeaderboardScope,
    pub uid: String,
    pub counters: Counters,
    pub score: i64,
    pub display_name: String,
    pub version: i64,
    pub at: DateTime<Utc>,
}

impl MirrorUpdate {
    fn from_totals(scope: LeaderboardScope, uid: &str, totals: &AggregateTotals) -> Self {
        Self {
            scope,
            uid: uid.to_string(),
            counters: totals.counters,
            score: totals.score,
            display_name: totals.display_name.clone(),
            version: totals.version,
            at: totals.updated_at,
        }
    }

    pub fn from_daily(daily: &DailyAggregate) -> Self {
        Self::from_totals(
            LeaderboardScope::Daily(daily.date_key.clone()),
            &daily.uid,
            &daily.totals,
        )
    }

    pub fn from_overall(overall: &OverallAggregate) -> Self {
        Self::from_totals(LeaderboardScope::Overall, &overall.uid, &overall.totals)
    }

    pub fn to_entry(&self) -> LeaderboardEntry {
        LeaderboardEntry {
            uid: self.uid.clone(),
            counters: self.counters,
            score: self.score,
            display_name: self.display_name.clone(),
            version: self.version,
            updated_at: self.at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    Written,
    /// The stored row already reflects this version or a newer one
    Stale,
}

/// How the overall board is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OverallStrategy {
    /// Read the mirrored overall rows
    #[default]
    Mirrored,
    /// Sum every daily row per user at query time
    FanIn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardSnapshot {
    pub scope: LeaderboardScope,
    pub entries: Vec<LeaderboardEntry>,
    pub generated_at: DateTime<Utc>,
}
