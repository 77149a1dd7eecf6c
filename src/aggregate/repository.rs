use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::models::{
    AggregateTotals, AppliedAggregates, ApplyDeltas, ApplyPlan, DailyAggregate, OverallAggregate,
};
use crate::clock::DateKey;
use crate::scoring::{AnswerTally, Counters};
use crate::store::{decode_date_key, is_retryable, RetryPolicy, StoreError};

/// Durable per-user daily and overall aggregates.
///
/// Every counter change goes through `apply_deltas`, which reads the current
/// records and writes the new ones as one atomic step, retrying internally when
/// a concurrent writer got there first.
#[async_trait]
pub trait AggregateRepository: Send + Sync {
    async fn apply_deltas(&self, request: &ApplyDeltas) -> Result<AppliedAggregates, StoreError>;
    async fn get_daily(
        &self,
        uid: &str,
        date_key: &DateKey,
    ) -> Result<Option<DailyAggregate>, StoreError>;
    async fn get_overall(&self, uid: &str) -> Result<Option<OverallAggregate>, StoreError>;
    async fn delete_user(&self, uid: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct AggregateTables {
    daily: HashMap<(String, DateKey), DailyAggregate>,
    overall: HashMap<String, OverallAggregate>,
    commit_marks: HashMap<(String, String), AnswerTally>,
}

/// What an attempt read; the write only lands if nothing changed since
#[derive(Debug, PartialEq)]
struct ReadVersions {
    daily: Option<i64>,
    overall: Option<i64>,
    mark: Option<AnswerTally>,
}

/// In-memory implementation with optimistic transactions: the read and the
/// write are separate steps and the write is rejected if a concurrent writer
/// moved any of the records in between.
pub struct InMemoryAggregateRepository {
    tables: RwLock<AggregateTables>,
    available: AtomicBool,
    retry: RetryPolicy,
}

impl Default for InMemoryAggregateRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAggregateRepository {
    pub fn new() -> Self {
        Self::with_retry(RetryPolicy::default())
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self {
            tables: RwLock::new(AggregateTables::default()),
            available: AtomicBool::new(true),
            retry,
        }
    }

    /// Simulates losing the connection to the store
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "in-memory aggregate store offline".to_string(),
            ))
        }
    }

    async fn try_apply(
        &self,
        request: &ApplyDeltas,
    ) -> Result<Option<AppliedAggregates>, StoreError> {
        let daily_key = (request.uid.clone(), request.date_key.clone());
        let mark_key = request
            .commit_key
            .as_ref()
            .map(|key| (request.uid.clone(), key.clone()));

        let (plan, read) = {
            let tables = self.tables.read().await;
            let daily = tables.daily.get(&daily_key);
            let overall = tables.overall.get(&request.uid);
            let mark = mark_key
                .as_ref()
                .and_then(|key| tables.commit_marks.get(key));
            let plan = ApplyPlan::resolve(request, daily, overall, mark)?;
            let read = ReadVersions {
                daily: daily.map(|d| d.totals.version),
                overall: overall.map(|o| o.totals.version),
                mark: mark.copied(),
            };
            (plan, read)
        };

        // Give concurrent writers the same window a remote round trip would
        tokio::task::yield_now().await;
        self.ensure_available()?;

        let mut tables = self.tables.write().await;
        let current = ReadVersions {
            daily: tables.daily.get(&daily_key).map(|d| d.totals.version),
            overall: tables.overall.get(&request.uid).map(|o| o.totals.version),
            mark: mark_key
                .as_ref()
                .and_then(|key| tables.commit_marks.get(key))
                .copied(),
        };
        if current != read {
            return Ok(None);
        }

        tables.daily.insert(daily_key, plan.daily.clone());
        tables
            .overall
            .insert(request.uid.clone(), plan.overall.clone());
        if let (Some(key), Some(mark)) = (mark_key, plan.commit_mark) {
            tables.commit_marks.insert(key, mark);
        }

        Ok(Some(plan.into_applied()))
    }
}

#[async_trait]
impl AggregateRepository for InMemoryAggregateRepository {
    #[instrument(skip(self, request), fields(uid = %request.uid, date_key = %request.date_key))]
    async fn apply_deltas(&self, request: &ApplyDeltas) -> Result<AppliedAggregates, StoreError> {
        for attempt in 1..=self.retry.max_attempts {
            self.ensure_available()?;
            if let Some(applied) = self.try_apply(request).await? {
                debug!(
                    attempt,
                    daily_score = applied.daily.totals.score,
                    overall_score = applied.overall.totals.score,
                    replayed = applied.replayed,
                    "Aggregates updated in memory"
                );
                return Ok(applied);
            }
            debug!(attempt, "Aggregate write lost a race, retrying");
            if attempt < self.retry.max_attempts {
                self.retry.pause(attempt).await;
            }
        }

        warn!(
            attempts = self.retry.max_attempts,
            "Giving up on aggregate write after repeated conflicts"
        );
        Err(StoreError::Conflict {
            attempts: self.retry.max_attempts,
        })
    }

    async fn get_daily(
        &self,
        uid: &str,
        date_key: &DateKey,
    ) -> Result<Option<DailyAggregate>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        Ok(tables
            .daily
            .get(&(uid.to_string(), date_key.clone()))
            .cloned())
    }

    async fn get_overall(&self, uid: &str) -> Result<Option<OverallAggregate>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        Ok(tables.overall.get(uid).cloned())
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, uid: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        tables.daily.retain(|(owner, _), _| owner != uid);
        tables.overall.remove(uid);
        tables.commit_marks.retain(|(owner, _), _| owner != uid);
        info!(uid = %uid, "Deleted aggregates from memory");
        Ok(())
    }
}

/// PostgreSQL implementation: each call is one transaction that row-locks the
/// daily and overall records (`SELECT ... FOR UPDATE`) before writing them.
pub struct PostgresAggregateRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

const DAILY_COLUMNS: &str = "uid, date_key, jp_en_correct, en_jp_correct, grammar_correct, \
     tasks_completed, score, display_name, version, updated_at";
const OVERALL_COLUMNS: &str = "uid, jp_en_correct, en_jp_correct, grammar_correct, \
     tasks_completed, score, display_name, version, updated_at";

impl PostgresAggregateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self::with_retry(pool, RetryPolicy::default())
    }

    pub fn with_retry(pool: PgPool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    /// Runs one transaction. The outer error is the database's (possibly a
    /// retryable serialization failure), the inner one is a domain rejection.
    async fn apply_once(
        &self,
        request: &ApplyDeltas,
    ) -> Result<Result<AppliedAggregates, StoreError>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Missing records are created at zero, stamped with the current name
        sqlx::query(
            "INSERT INTO daily_aggregates (uid, date_key, display_name, updated_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (uid, date_key) DO NOTHING",
        )
        .bind(&request.uid)
        .bind(request.date_key.as_str())
        .bind(&request.display_name)
        .bind(request.at)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO overall_aggregates (uid, display_name, updated_at) \
             VALUES ($1, $2, $3) ON CONFLICT (uid) DO NOTHING",
        )
        .bind(&request.uid)
        .bind(&request.display_name)
        .bind(request.at)
        .execute(&mut *tx)
        .await?;

        let daily_row = sqlx::query(&format!(
            "SELECT {DAILY_COLUMNS} FROM daily_aggregates \
             WHERE uid = $1 AND date_key = $2 FOR UPDATE"
        ))
        .bind(&request.uid)
        .bind(request.date_key.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let overall_row = sqlx::query(&format!(
            "SELECT {OVERALL_COLUMNS} FROM overall_aggregates WHERE uid = $1 FOR UPDATE"
        ))
        .bind(&request.uid)
        .fetch_one(&mut *tx)
        .await?;

        let daily = daily_from_row(&daily_row)?;
        let overall = overall_from_row(&overall_row)?;
        let mark = match &request.commit_key {
            Some(key) => load_commit_mark(&mut tx, &request.uid, key).await?,
            None => None,
        };

        let plan = match ApplyPlan::resolve(request, Some(&daily), Some(&overall), mark.as_ref()) {
            Ok(plan) => plan,
            // Dropping the transaction rolls it back
            Err(e) => return Ok(Err(e)),
        };

        let totals = &plan.daily.totals;
        sqlx::query(
            "UPDATE daily_aggregates SET jp_en_correct = $3, en_jp_correct = $4, \
             grammar_correct = $5, tasks_completed = $6, score = $7, display_name = $8, \
             version = $9, updated_at = $10 WHERE uid = $1 AND date_key = $2",
        )
        .bind(&request.uid)
        .bind(request.date_key.as_str())
        .bind(totals.counters.jp_en_correct)
        .bind(totals.counters.en_jp_correct)
        .bind(totals.counters.grammar_correct)
        .bind(totals.counters.tasks_completed)
        .bind(totals.score)
        .bind(&totals.display_name)
        .bind(totals.version)
        .bind(totals.updated_at)
        .execute(&mut *tx)
        .await?;

        let totals = &plan.overall.totals;
        sqlx::query(
            "UPDATE overall_aggregates SET jp_en_correct = $2, en_jp_correct = $3, \
             grammar_correct = $4, tasks_completed = $5, score = $6, display_name = $7, \
             version = $8, updated_at = $9 WHERE uid = $1",
        )
        .bind(&request.uid)
        .bind(totals.counters.jp_en_correct)
        .bind(totals.counters.en_jp_correct)
        .bind(totals.counters.grammar_correct)
        .bind(totals.counters.tasks_completed)
        .bind(totals.score)
        .bind(&totals.display_name)
        .bind(totals.version)
        .bind(totals.updated_at)
        .execute(&mut *tx)
        .await?;

        if let (Some(key), Some(mark)) = (&request.commit_key, plan.commit_mark) {
            sqlx::query(
                "INSERT INTO applied_commits \
                 (uid, commit_key, jp_en_correct, en_jp_correct, grammar_correct, applied_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (uid, commit_key) DO UPDATE SET \
                 jp_en_correct = EXCLUDED.jp_en_correct, en_jp_correct = EXCLUDED.en_jp_correct, \
                 grammar_correct = EXCLUDED.grammar_correct, applied_at = EXCLUDED.applied_at",
            )
            .bind(&request.uid)
            .bind(key)
            .bind(mark.jp_en_correct)
            .bind(mark.en_jp_correct)
            .bind(mark.grammar_correct)
            .bind(request.at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Ok(plan.into_applied()))
    }
}

async fn load_commit_mark(
    tx: &mut Transaction<'_, Postgres>,
    uid: &str,
    key: &str,
) -> Result<Option<AnswerTally>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT jp_en_correct, en_jp_correct, grammar_correct FROM applied_commits \
         WHERE uid = $1 AND commit_key = $2 FOR UPDATE",
    )
    .bind(uid)
    .bind(key)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(|row| {
        Ok(AnswerTally {
            jp_en_correct: row.try_get("jp_en_correct")?,
            en_jp_correct: row.try_get("en_jp_correct")?,
            grammar_correct: row.try_get("grammar_correct")?,
        })
    })
    .transpose()
}

fn totals_from_row(row: &PgRow) -> Result<AggregateTotals, sqlx::Error> {
    Ok(AggregateTotals {
        counters: Counters {
            jp_en_correct: row.try_get("jp_en_correct")?,
            en_jp_correct: row.try_get("en_jp_correct")?,
            grammar_correct: row.try_get("grammar_correct")?,
            tasks_completed: row.try_get("tasks_completed")?,
        },
        score: row.try_get("score")?,
        display_name: row.try_get("display_name")?,
        version: row.try_get("version")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn daily_from_row(row: &PgRow) -> Result<DailyAggregate, sqlx::Error> {
    let raw_key: String = row.try_get("date_key")?;
    Ok(DailyAggregate {
        uid: row.try_get("uid")?,
        date_key: decode_date_key(&raw_key)?,
        totals: totals_from_row(row)?,
    })
}

fn overall_from_row(row: &PgRow) -> Result<OverallAggregate, sqlx::Error> {
    Ok(OverallAggregate {
        uid: row.try_get("uid")?,
        totals: totals_from_row(row)?,
    })
}

#[async_trait]
impl AggregateRepository for PostgresAggregateRepository {
    #[instrument(skip(self, request), fields(uid = %request.uid, date_key = %request.date_key))]
    async fn apply_deltas(&self, request: &ApplyDeltas) -> Result<AppliedAggregates, StoreError> {
        for attempt in 1..=self.retry.max_attempts {
            match self.apply_once(request).await {
                Ok(Ok(applied)) => {
                    debug!(
                        attempt,
                        daily_score = applied.daily.totals.score,
                        overall_score = applied.overall.totals.score,
                        "Aggregates updated in database"
                    );
                    return Ok(applied);
                }
                Ok(Err(rejected)) => {
                    warn!(error = %rejected, "Aggregate write rejected");
                    return Err(rejected);
                }
                Err(e) if is_retryable(&e) => {
                    debug!(attempt, error = %e, "Aggregate transaction conflicted, retrying");
                    if attempt < self.retry.max_attempts {
                        self.retry.pause(attempt).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to apply aggregate deltas");
                    return Err(e.into());
                }
            }
        }

        Err(StoreError::Conflict {
            attempts: self.retry.max_attempts,
        })
    }

    async fn get_daily(
        &self,
        uid: &str,
        date_key: &DateKey,
    ) -> Result<Option<DailyAggregate>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {DAILY_COLUMNS} FROM daily_aggregates WHERE uid = $1 AND date_key = $2"
        ))
        .bind(uid)
        .bind(date_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(daily_from_row).transpose()?)
    }

    async fn get_overall(&self, uid: &str) -> Result<Option<OverallAggregate>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {OVERALL_COLUMNS} FROM overall_aggregates WHERE uid = $1"
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(overall_from_row).transpose()?)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, uid: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for table in ["daily_aggregates", "overall_aggregates", "applied_commits"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE uid = $1"))
                .bind(uid)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!(uid = %uid, "Deleted aggregates from database");
        Ok(())
    }
}
