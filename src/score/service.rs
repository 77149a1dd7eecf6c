use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::types::{CommitError, CommitReceipt, CommitRequest, Progress, ProgressTotals};
use crate::aggregate::{AggregateRepository, AggregateTotals, AppliedAggregates, ApplyDeltas};
use crate::attempt::{Attempt, AttemptRepository, InMemoryAttemptRepository};
use crate::auth::AuthUser;
use crate::clock::{self, Clock, DateKey, SystemClock};
use crate::leaderboard::{
    InMemoryLeaderboardRepository, LeaderboardFeed, LeaderboardRepository, LeaderboardScope,
    LeaderboardSnapshot, MirrorOutcome, MirrorUpdate, OverallStrategy,
};
use crate::scoring::ScoreDeltas;
use crate::store::StoreError;
use crate::user::{InMemoryUserRepository, UserModel, UserRepository};

pub const DEFAULT_BOARD_LIMIT: usize = 20;
pub const MAX_BOARD_LIMIT: usize = 100;

/// Folds practice results and task toggles into the aggregates, keeps the
/// leaderboard rows in step and pushes fresh boards to live subscribers.
pub struct ScoreService {
    aggregates: Arc<dyn AggregateRepository>,
    leaderboard: Arc<dyn LeaderboardRepository>,
    users: Arc<dyn UserRepository>,
    attempts: Arc<dyn AttemptRepository>,
    feed: LeaderboardFeed,
    clock: Arc<dyn Clock>,
    overall_strategy: OverallStrategy,
    board_limit: usize,
    user_mutexes: Arc<RwLock<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Idempotency key of one day bucket of a commit
fn commit_key(commit_id: Uuid, date_key: &DateKey) -> String {
    format!("{commit_id}:{date_key}")
}

fn totals_view(totals: Option<&AggregateTotals>) -> ProgressTotals {
    totals
        .map(|t| ProgressTotals {
            counters: t.counters,
            score: t.score,
        })
        .unwrap_or_default()
}

impl ScoreService {
    pub fn builder(aggregates: Arc<dyn AggregateRepository>) -> ScoreServiceBuilder {
        ScoreServiceBuilder::new(aggregates)
    }

    pub fn feed(&self) -> &LeaderboardFeed {
        &self.feed
    }

    pub fn board_limit(&self) -> usize {
        self.board_limit
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Day key of the current instant, in UTC
    pub fn today(&self) -> DateKey {
        clock::date_key(self.clock.now(), &Utc)
    }

    #[instrument(skip(self))]
    pub async fn ensure_user(&self, uid: &str, display_name: &str) -> Result<UserModel, StoreError> {
        self.users
            .get_or_create(uid, display_name, self.clock.now())
            .await
    }

    /// Applies a buffer snapshot. Each day bucket is applied under its own
    /// idempotency key, so resending the same commit never double counts.
    #[instrument(skip(self, user, request), fields(uid = %user.uid, commit_id = %request.commit_id))]
    pub async fn commit(
        &self,
        user: &AuthUser,
        request: &CommitRequest,
    ) -> Result<CommitReceipt, CommitError> {
        request.validate()?;

        let lock = self.user_lock(&user.uid).await;
        let _guard = lock.lock().await;

        let profile = self.ensure_user(&user.uid, &user.display_name).await?;
        if request.is_empty() {
            debug!("Nothing to commit");
            return Ok(CommitReceipt::empty(request.commit_id));
        }

        let now = self.clock.now();
        let mut receipt = CommitReceipt::empty(request.commit_id);
        let mut replays = Vec::new();
        let mut touched = Vec::new();

        for day in request.days.iter().filter(|day| !day.tally.is_zero()) {
            let apply = ApplyDeltas::new(
                &user.uid,
                day.date_key.clone(),
                ScoreDeltas::from(day.tally),
                &profile.display_name,
            )
            .with_commit_key(commit_key(request.commit_id, &day.date_key))
            .at(now);

            let applied = self.aggregates.apply_deltas(&apply).await?;
            self.mirror(&applied).await?;

            replays.push(applied.replayed);
            touched.push(LeaderboardScope::Daily(day.date_key.clone()));
            receipt.daily.push(applied.daily);
            receipt.overall = Some(applied.overall);
        }

        receipt.replayed = !replays.is_empty() && replays.iter().all(|replayed| *replayed);
        receipt.attempt_recorded = self.record_attempt(&user.uid, request, now).await;

        if !touched.is_empty() {
            touched.push(LeaderboardScope::Overall);
            self.publish(&touched).await;
        }

        info!(
            days = receipt.daily.len(),
            overall_score = receipt.overall.as_ref().map(|o| o.totals.score),
            replayed = receipt.replayed,
            attempt_recorded = receipt.attempt_recorded,
            "Commit applied"
        );
        Ok(receipt)
    }

    /// Applies a task-completion delta for one day. A failed aggregate write is
    /// returned; a failed mirror is logged and repaired by the next write.
    #[instrument(skip(self, display_name))]
    pub async fn apply_task_delta(
        &self,
        uid: &str,
        date_key: &DateKey,
        delta: i64,
        display_name: &str,
    ) -> Result<AppliedAggregates, StoreError> {
        let lock = self.user_lock(uid).await;
        let _guard = lock.lock().await;

        let profile = self.ensure_user(uid, display_name).await?;
        let apply = ApplyDeltas::new(
            uid,
            date_key.clone(),
            ScoreDeltas::tasks(delta),
            &profile.display_name,
        )
        .at(self.clock.now());

        let applied = self.aggregates.apply_deltas(&apply).await?;
        if let Err(e) = self.mirror(&applied).await {
            warn!(error = %e, "Leaderboard mirror lagging after task toggle");
        }
        self.publish(&[LeaderboardScope::Daily(date_key.clone()), LeaderboardScope::Overall])
            .await;

        Ok(applied)
    }

    async fn mirror(&self, applied: &AppliedAggregates) -> Result<(), StoreError> {
        for update in [
            MirrorUpdate::from_daily(&applied.daily),
            MirrorUpdate::from_overall(&applied.overall),
        ] {
            if self.leaderboard.mirror(&update).await? == MirrorOutcome::Stale {
                debug!(scope = %update.scope, version = update.version, "Mirror already newer");
            }
        }
        Ok(())
    }

    async fn record_attempt(&self, uid: &str, request: &CommitRequest, now: DateTime<Utc>) -> bool {
        let attempt = Attempt {
            id: request.commit_id,
            uid: uid.to_string(),
            deck_name: request.deck_name.clone(),
            mode: request.mode,
            correct: request.correct,
            wrong: request.wrong,
            skipped: request.skipped,
            total: request.total,
            created_at: request.client_created_at,
            created_at_server: now,
        };

        match self.attempts.append(&attempt).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Attempt history write failed; counters already saved");
                false
            }
        }
    }

    async fn publish(&self, scopes: &[LeaderboardScope]) {
        for scope in scopes {
            if !self.feed.has_subscribers(scope).await {
                continue;
            }
            // Subscribers trim to their own limit
            match self.leaderboard(scope, MAX_BOARD_LIMIT).await {
                Ok(snapshot) => self.feed.publish(snapshot).await,
                Err(e) => warn!(scope = %scope, error = %e, "Failed to build live leaderboard"),
            }
        }
    }

    /// Top entries of a board, score descending then uid ascending
    #[instrument(skip(self))]
    pub async fn leaderboard(
        &self,
        scope: &LeaderboardScope,
        limit: usize,
    ) -> Result<LeaderboardSnapshot, StoreError> {
        let limit = limit.clamp(1, MAX_BOARD_LIMIT);
        let entries = match (scope, self.overall_strategy) {
            (LeaderboardScope::Overall, OverallStrategy::FanIn) => {
                self.leaderboard.fan_in_overall(limit).await?
            }
            _ => self.leaderboard.top_n(scope, limit).await?,
        };

        Ok(LeaderboardSnapshot {
            scope: scope.clone(),
            entries,
            generated_at: self.clock.now(),
        })
    }

    pub async fn progress(&self, uid: &str, date_key: &DateKey) -> Result<Progress, StoreError> {
        let daily = self.aggregates.get_daily(uid, date_key).await?;
        let overall = self.aggregates.get_overall(uid).await?;

        Ok(Progress {
            date_key: date_key.clone(),
            daily: totals_view(daily.as_ref().map(|d| &d.totals)),
            overall: totals_view(overall.as_ref().map(|o| &o.totals)),
        })
    }

    pub async fn attempts(&self, uid: &str, limit: usize) -> Result<Vec<Attempt>, StoreError> {
        self.attempts.list_for_user(uid, limit).await
    }

    /// Wipes the user's aggregates, board rows and attempts. The user record stays.
    #[instrument(skip(self))]
    pub async fn reset_user(&self, uid: &str) -> Result<(), StoreError> {
        {
            let lock = self.user_lock(uid).await;
            let _guard = lock.lock().await;

            // A board row must never outlive its aggregate
            self.leaderboard.delete_user(uid).await?;
            self.aggregates.delete_user(uid).await?;
            self.attempts.delete_user(uid).await?;
        }
        self.clear_user_lock(uid).await;
        self.publish(&[LeaderboardScope::Overall]).await;

        info!(uid = %uid, "User progress reset");
        Ok(())
    }

    async fn user_lock(&self, uid: &str) -> Arc<AsyncMutex<()>> {
        {
            let guard = self.user_mutexes.read().await;
            if let Some(lock) = guard.get(uid) {
                return lock.clone();
            }
        }

        let mut guard = self.user_mutexes.write().await;
        guard
            .entry(uid.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn clear_user_lock(&self, uid: &str) {
        let mut guard = self.user_mutexes.write().await;
        guard.remove(uid);
    }
}

pub struct ScoreServiceBuilder {
    aggregates: Arc<dyn AggregateRepository>,
    leaderboard: Arc<dyn LeaderboardRepository>,
    users: Arc<dyn UserRepository>,
    attempts: Arc<dyn AttemptRepository>,
    feed: LeaderboardFeed,
    clock: Arc<dyn Clock>,
    overall_strategy: OverallStrategy,
    board_limit: usize,
}

impl ScoreServiceBuilder {
    fn new(aggregates: Arc<dyn AggregateRepository>) -> Self {
        Self {
            aggregates,
            leaderboard: Arc::new(InMemoryLeaderboardRepository::new()),
            users: Arc::new(InMemoryUserRepository::new()),
            attempts: Arc::new(InMemoryAttemptRepository::new()),
            feed: LeaderboardFeed::new(),
            clock: Arc::new(SystemClock),
            overall_strategy: OverallStrategy::default(),
            board_limit: DEFAULT_BOARD_LIMIT,
        }
    }

    pub fn with_leaderboard(mut self, leaderboard: Arc<dyn LeaderboardRepository>) -> Self {
        self.leaderboard = leaderboard;
        self
    }

    pub fn with_users(mut self, users: Arc<dyn UserRepository>) -> Self {
        self.users = users;
        self
    }

    pub fn with_attempts(mut self, attempts: Arc<dyn AttemptRepository>) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_feed(mut self, feed: LeaderboardFeed) -> Self {
        self.feed = feed;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_overall_strategy(mut self, strategy: OverallStrategy) -> Self {
        self.overall_strategy = strategy;
        self
    }

    pub fn with_board_limit(mut self, limit: usize) -> Self {
        self.board_limit = limit.clamp(1, MAX_BOARD_LIMIT);
        self
    }

    pub fn build(self) -> ScoreService {
        ScoreService {
            aggregates: self.aggregates,
            leaderboard: self.leaderboard,
            users: self.users,
            attempts: self.attempts,
            feed: self.feed,
            clock: self.clock,
            overall_strategy: self.overall_strategy,
            board_limit: self.board_limit,
            user_mutexes: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}
