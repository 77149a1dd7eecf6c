use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::models::{LeaderboardEntry, LeaderboardScope, MirrorOutcome, MirrorUpdate};
use crate::scoring::{self, Counters};
use crate::store::StoreError;

/// Denormalized, sortable copies of the aggregates
#[async_trait]
pub trait LeaderboardRepository: Send + Sync {
    /// Upserts the row unless it already holds this version or a newer one
    async fn mirror(&self, update: &MirrorUpdate) -> Result<MirrorOutcome, StoreError>;
    async fn top_n(
        &self,
        scope: &LeaderboardScope,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, StoreError>;
    async fn get_entry(
        &self,
        scope: &LeaderboardScope,
        uid: &str,
    ) -> Result<Option<LeaderboardEntry>, StoreError>;
    /// Overall board computed by summing every daily row per user
    async fn fan_in_overall(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError>;
    async fn delete_user(&self, uid: &str) -> Result<(), StoreError>;
}

fn check_consistent(update: &MirrorUpdate) -> Result<(), StoreError> {
    if scoring::is_consistent(&update.counters, update.score) {
        Ok(())
    } else {
        Err(StoreError::InvariantViolation(format!(
            "mirror for {} on {} carries score {} for counters {:?}",
            update.uid, update.scope, update.score, update.counters
        )))
    }
}

fn fan_in(entries: &[&LeaderboardEntry]) -> Vec<LeaderboardEntry> {
    let mut totals: HashMap<&str, LeaderboardEntry> = HashMap::new();
    for entry in entries {
        let total = totals
            .entry(entry.uid.as_str())
            .or_insert_with(|| LeaderboardEntry {
                uid: entry.uid.clone(),
                counters: Counters::default(),
                score: 0,
                display_name: entry.display_name.clone(),
                version: 0,
                updated_at: entry.updated_at,
            });
        total.counters.jp_en_correct += entry.counters.jp_en_correct;
        total.counters.en_jp_correct += entry.counters.en_jp_correct;
        total.counters.grammar_correct += entry.counters.grammar_correct;
        total.counters.tasks_completed += entry.counters.tasks_completed;
        total.score += entry.score;
        if entry.updated_at > total.updated_at {
            total.updated_at = entry.updated_at;
            total.display_name = entry.display_name.clone();
        }
    }
    totals.into_values().collect()
}

#[derive(Debug)]
pub struct InMemoryLeaderboardRepository {
    boards: RwLock<HashMap<LeaderboardScope, HashMap<String, LeaderboardEntry>>>,
    available: AtomicBool,
}

impl Default for InMemoryLeaderboardRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLeaderboardRepository {
    pub fn new() -> Self {
        Self {
            boards: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "in-memory leaderboard offline".to_string(),
            ))
        }
    }
}

#[async_trait]
impl LeaderboardRepository for InMemoryLeaderboardRepository {
    #[instrument(skip(self, update), fields(scope = %update.scope, uid = %update.uid, version = update.version))]
    async fn mirror(&self, update: &MirrorUpdate) -> Result<MirrorOutcome, StoreError> {
        self.ensure_available()?;
        check_consistent(update)?;

        let mut boards = self.boards.write().await;
        let board = boards.entry(update.scope.clone()).or_default();
        if let Some(existing) = board.get(&update.uid) {
            if existing.version >= update.version {
                debug!(stored = existing.version, "Ignoring stale mirror write");
                return Ok(MirrorOutcome::Stale);
            }
        }
        board.insert(update.uid.clone(), update.to_entry());
        Ok(MirrorOutcome::Written)
    }

    async fn top_n(
        &self,
        scope: &LeaderboardScope,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        self.ensure_available()?;
        let boards = self.boards.read().await;
        let mut entries: Vec<LeaderboardEntry> = boards
            .get(scope)
            .map(|board| board.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by(LeaderboardEntry::rank_order);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn get_entry(
        &self,
        scope: &LeaderboardScope,
        uid: &str,
    ) -> Result<Option<LeaderboardEntry>, StoreError> {
        self.ensure_available()?;
        let boards = self.boards.read().await;
        Ok(boards.get(scope).and_then(|board| board.get(uid)).cloned())
    }

    async fn fan_in_overall(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError> {
        self.ensure_available()?;
        let boards = self.boards.read().await;
        let daily_rows: Vec<&LeaderboardEntry> = boards
            .iter()
            .filter(|(scope, _)| matches!(scope, LeaderboardScope::Daily(_)))
            .flat_map(|(_, board)| board.values())
            .collect();

        let mut entries = fan_in(&daily_rows);
        entries.sort_by(LeaderboardEntry::rank_order);
        entries.truncate(limit);
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, uid: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut boards = self.boards.write().await;
        for board in boards.values_mut() {
            board.remove(uid);
        }
        info!(uid = %uid, "Deleted leaderboard rows from memory");
        Ok(())
    }
}

pub struct PostgresLeaderboardRepository {
    pool: PgPool,
}

impl PostgresLeaderboardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ENTRY_COLUMNS: &str = "uid, jp_en_correct, en_jp_correct, grammar_correct, \
     tasks_completed, score, display_name, version, updated_at";

fn entry_from_row(row: &PgRow) -> Result<LeaderboardEntry, sqlx::Error> {
    Ok(LeaderboardEntry {
        uid: row.try_get("uid")?,
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

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl LeaderboardRepository for PostgresLeaderboardRepository {
    #[instrument(skip(self, update), fields(scope = %update.scope, uid = %update.uid, version = update.version))]
    async fn mirror(&self, update: &MirrorUpdate) -> Result<MirrorOutcome, StoreError> {
        check_consistent(update)?;

        let written = sqlx::query(
            "INSERT INTO leaderboard_entries \
             (scope, uid, jp_en_correct, en_jp_correct, grammar_correct, tasks_completed, \
              score, display_name, version, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (scope, uid) DO UPDATE SET \
             jp_en_correct = EXCLUDED.jp_en_correct, en_jp_correct = EXCLUDED.en_jp_correct, \
             grammar_correct = EXCLUDED.grammar_correct, \
             tasks_completed = EXCLUDED.tasks_completed, score = EXCLUDED.score, \
             display_name = EXCLUDED.display_name, version = EXCLUDED.version, \
             updated_at = EXCLUDED.updated_at \
             WHERE leaderboard_entries.version < EXCLUDED.version \
             RETURNING uid",
        )
        .bind(update.scope.key())
        .bind(&update.uid)
        .bind(update.counters.jp_en_correct)
        .bind(update.counters.en_jp_correct)
        .bind(update.counters.grammar_correct)
        .bind(update.counters.tasks_completed)
        .bind(update.score)
        .bind(&update.display_name)
        .bind(update.version)
        .bind(update.at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to mirror leaderboard row");
            StoreError::from(e)
        })?;

        match written {
            Some(_) => Ok(MirrorOutcome::Written),
            None => {
                debug!("Ignoring stale mirror write");
                Ok(MirrorOutcome::Stale)
            }
        }
    }

    async fn top_n(
        &self,
        scope: &LeaderboardScope,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM leaderboard_entries WHERE scope = $1 \
             ORDER BY score DESC, uid ASC LIMIT $2"
        ))
        .bind(scope.key())
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn get_entry(
        &self,
        scope: &LeaderboardScope,
        uid: &str,
    ) -> Result<Option<LeaderboardEntry>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM leaderboard_entries WHERE scope = $1 AND uid = $2"
        ))
        .bind(scope.key())
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(entry_from_row).transpose()?)
    }

    async fn fan_in_overall(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT uid, \
             SUM(jp_en_correct)::BIGINT AS jp_en_correct, \
             SUM(en_jp_correct)::BIGINT AS en_jp_correct, \
             SUM(grammar_correct)::BIGINT AS grammar_correct, \
             SUM(tasks_completed)::BIGINT AS tasks_completed, \
             SUM(score)::BIGINT AS score, \
             (ARRAY_AGG(display_name ORDER BY updated_at DESC))[1] AS display_name, \
             0::BIGINT AS version, \
             MAX(updated_at) AS updated_at \
             FROM leaderboard_entries WHERE scope <> 'overall' \
             GROUP BY uid ORDER BY score DESC, uid ASC LIMIT $1",
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, uid: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM leaderboard_entries WHERE uid = $1")
            .bind(uid)
            .execute(&self.pool)
            .await?;
        info!(uid = %uid, "Deleted leaderboard rows from database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::DateKey;
    use chrono::Utc;

    fn update(scope: LeaderboardScope, uid: &str, jp_en: i64, version: i64) -> MirrorUpdate {
        let counters = Counters {
            jp_en_correct: jp_en,
            ..Counters::default()
        };
        MirrorUpdate {
            scope,
            uid: uid.to_string(),
            counters,
            score: counters.score(),
            display_name: uid.to_uppercase(),
            version,
            at: Utc::now(),
        }
    }

    fn day(raw: &str) -> LeaderboardScope {
        LeaderboardScope::Daily(DateKey::parse(raw).unwrap())
    }

    #[tokio::test]
    async fn older_version_never_overwrites() {
        let repo = InMemoryLeaderboardRepository::new();
        let scope = day("2024-05-01");

        let newer = repo.mirror(&update(scope.clone(), "u1", 5, 3)).await.unwrap();
        let older = repo.mirror(&update(scope.clone(), "u1", 2, 2)).await.unwrap();

        assert_eq!(newer, MirrorOutcome::Written);
        assert_eq!(older, MirrorOutcome::Stale);
        let entry = repo.get_entry(&scope, "u1").await.unwrap().unwrap();
        assert_eq!(entry.score, 5);
    }

    #[tokio::test]
    async fn inconsistent_score_is_rejected() {
        let repo = InMemoryLeaderboardRepository::new();
        let mut bad = update(LeaderboardScope::Overall, "u1", 2, 1);
        bad.score = 99;

        let result = repo.mirror(&bad).await;
        assert!(matches!(result, Err(StoreError::InvariantViolation(_))));
        assert!(repo
            .get_entry(&LeaderboardScope::Overall, "u1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn top_n_sorts_and_limits() {
        let repo = InMemoryLeaderboardRepository::new();
        let scope = LeaderboardScope::Overall;
        for (uid, score) in [("dan", 4), ("amy", 7), ("cat", 7), ("bea", 1)] {
            repo.mirror(&update(scope.clone(), uid, score, 1)).await.unwrap();
        }

        let top = repo.top_n(&scope, 3).await.unwrap();
        let uids: Vec<&str> = top.iter().map(|e| e.uid.as_str()).collect();
        assert_eq!(uids, vec!["amy", "cat", "dan"]);
    }

    #[tokio::test]
    async fn fan_in_sums_daily_rows() {
        let repo = InMemoryLeaderboardRepository::new();
        repo.mirror(&update(day("2024-05-01"), "u1", 3, 1)).await.unwrap();
        repo.mirror(&update(day("2024-05-02"), "u1", 4, 1)).await.unwrap();
        repo.mirror(&update(day("2024-05-02"), "u2", 5, 1)).await.unwrap();
        repo.mirror(&update(LeaderboardScope::Overall, "u2", 100, 1))
            .await
            .unwrap();

        let board = repo.fan_in_overall(10).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].uid, "u1");
        assert_eq!(board[0].score, 7);
        assert_eq!(board[1].score, 5);
    }
}
