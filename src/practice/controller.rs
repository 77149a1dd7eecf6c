use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::buffer::SessionBuffer;
use super::scratch::{ScratchError, SessionSlots};
use crate::auth::{AuthProvider, AuthUser};
use crate::clock::{self, Clock};
use crate::score::{CommitError, CommitReceipt, CommitRequest, ScoreService};
use crate::scoring::{AnswerDelta, AnswerMode};

/// Where buffer snapshots are sent
#[async_trait]
pub trait CommitTarget: Send + Sync {
    async fn commit(
        &self,
        user: &AuthUser,
        request: &CommitRequest,
    ) -> Result<CommitReceipt, CommitError>;
}

#[async_trait]
impl CommitTarget for ScoreService {
    async fn commit(
        &self,
        user: &AuthUser,
        request: &CommitRequest,
    ) -> Result<CommitReceipt, CommitError> {
        ScoreService::commit(self, user, request).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPhase {
    Idle,
    Accumulating,
    Committing,
    /// The last commit did not land; the buffer is kept for the next trigger
    PendingRetry,
}

/// "Could not save, will retry" message shown instead of an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveNotice {
    pub message: String,
    pub retryable: bool,
}

impl SaveNotice {
    fn from_error(error: &CommitError) -> Self {
        let retryable = error.is_retryable();
        let message = if retryable {
            format!("Could not save your progress, will retry: {error}")
        } else {
            format!("Could not save your progress: {error}")
        };
        Self { message, retryable }
    }

    fn scratch(error: &ScratchError) -> Self {
        Self {
            message: format!("Could not read saved sessions: {error}"),
            retryable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(CommitReceipt),
    NothingToCommit,
    /// Another commit is running; this trigger was dropped
    AlreadyInFlight,
    /// Nobody is signed in; the buffer was stashed for recovery
    Deferred,
    Failed(SaveNotice),
}

impl CommitOutcome {
    fn settled(&self) -> bool {
        matches!(self, CommitOutcome::Committed(_) | CommitOutcome::NothingToCommit)
    }
}

#[derive(Debug, Error)]
pub enum PracticeError {
    #[error("No deck selected")]
    NoDeckSelected,

    #[error(transparent)]
    Scratch(#[from] ScratchError),
}

struct SessionState {
    buffer: Option<SessionBuffer>,
    phase: SessionPhase,
}

/// Releases the re-entrancy flag when a commit finishes, however it finishes
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the practice buffer of one client and decides when it is committed.
///
/// Answers are recorded without waiting on commits: a commit works on a copy
/// and afterwards removes only the copied counts from the live buffer.
/// `Tz` is the learner's zone; day buckets follow its offset at each answer,
/// daylight saving included.
pub struct SessionController<Tz: TimeZone = Local> {
    target: Arc<dyn CommitTarget>,
    auth: Arc<dyn AuthProvider>,
    slots: SessionSlots,
    clock: Arc<dyn Clock>,
    zone: Tz,
    state: Mutex<SessionState>,
    in_flight: AtomicBool,
}

impl<Tz: TimeZone + Send + Sync> SessionController<Tz> {
    pub fn new(
        target: Arc<dyn CommitTarget>,
        auth: Arc<dyn AuthProvider>,
        slots: SessionSlots,
        clock: Arc<dyn Clock>,
        zone: Tz,
    ) -> Self {
        Self {
            target,
            auth,
            slots,
            clock,
            zone,
            state: Mutex::new(SessionState {
                buffer: None,
                phase: SessionPhase::Idle,
            }),
            in_flight: AtomicBool::new(false),
        }
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.lock().await.phase
    }

    pub async fn buffer(&self) -> Option<SessionBuffer> {
        self.state.lock().await.buffer.clone()
    }

    /// Reloads the buffer saved in the current slot
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<Option<SessionBuffer>, PracticeError> {
        let restored = self.slots.load_current().await?;
        let mut state = self.state.lock().await;
        state.phase = match &restored {
            Some(buffer) if !buffer.is_empty() => SessionPhase::Accumulating,
            _ => SessionPhase::Idle,
        };
        state.buffer = restored.clone();
        debug!(restored = restored.is_some(), "Session restored");
        Ok(restored)
    }

    /// Commits what the current deck has accumulated, then starts a fresh
    /// buffer. A buffer that could not be committed is kept in the pending slot.
    #[instrument(skip(self))]
    pub async fn select_deck(&self, deck_name: &str, mode: AnswerMode) -> CommitOutcome {
        let outcome = self.save().await;
        if !outcome.settled() {
            self.stash_current().await;
        }

        let fresh = SessionBuffer::new(deck_name, mode, self.clock.now());
        self.persist(&fresh).await;
        let mut state = self.state.lock().await;
        state.buffer = Some(fresh);
        state.phase = SessionPhase::Idle;
        outcome
    }

    pub async fn record_answer(
        &self,
        mode: AnswerMode,
        is_correct: bool,
        at: DateTime<Utc>,
    ) -> Result<AnswerDelta, PracticeError> {
        let date_key = clock::date_key(at, &self.zone);
        let mut state = self.state.lock().await;
        let buffer = state.buffer.as_mut().ok_or(PracticeError::NoDeckSelected)?;
        let delta = buffer.record_answer(mode, is_correct, date_key);
        let snapshot = buffer.clone();

        if state.phase == SessionPhase::Idle {
            state.phase = SessionPhase::Accumulating;
        }
        drop(state);
        self.persist(&snapshot).await;
        Ok(delta)
    }

    pub async fn record_skip(&self) -> Result<(), PracticeError> {
        let mut state = self.state.lock().await;
        let buffer = state.buffer.as_mut().ok_or(PracticeError::NoDeckSelected)?;
        buffer.record_skip();
        let snapshot = buffer.clone();

        if state.phase == SessionPhase::Idle {
            state.phase = SessionPhase::Accumulating;
        }
        drop(state);
        self.persist(&snapshot).await;
        Ok(())
    }

    /// Explicit save
    #[instrument(skip(self))]
    pub async fn save(&self) -> CommitOutcome {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            debug!("Commit already in flight");
            return CommitOutcome::AlreadyInFlight;
        };

        let snapshot = {
            let mut state = self.state.lock().await;
            let Some(snapshot) = state.buffer.clone().filter(|b| !b.is_empty()) else {
                return CommitOutcome::NothingToCommit;
            };
            state.phase = SessionPhase::Committing;
            snapshot
        };

        let outcome = self.commit_snapshot(&snapshot).await;

        let mut state = self.state.lock().await;
        if let (CommitOutcome::Committed(_), Some(buffer)) = (&outcome, state.buffer.as_mut()) {
            if buffer.session_id == snapshot.session_id && buffer.commit_id == snapshot.commit_id {
                buffer.settle(&snapshot);
            }
        }
        let phase = match (&outcome, &state.buffer) {
            (CommitOutcome::Committed(_), Some(buffer)) if !buffer.is_empty() => {
                SessionPhase::Accumulating
            }
            (CommitOutcome::Committed(_), _) => SessionPhase::Idle,
            _ => SessionPhase::PendingRetry,
        };
        state.phase = phase;
        let current = state.buffer.clone();
        drop(state);

        if let Some(buffer) = current {
            self.persist(&buffer).await;
        }
        outcome
    }

    pub async fn navigate_away(&self) -> CommitOutcome {
        self.save().await
    }

    /// Commits the finished set and starts a new run on the same deck
    #[instrument(skip(self))]
    pub async fn complete_set(&self) -> CommitOutcome {
        let outcome = self.save().await;
        if !outcome.settled() {
            return outcome;
        }

        let mut state = self.state.lock().await;
        let next = state
            .buffer
            .as_ref()
            .filter(|buffer| buffer.is_empty())
            .map(|buffer| SessionBuffer::new(&buffer.deck_name, buffer.mode, self.clock.now()));
        if let Some(next) = next {
            state.buffer = Some(next.clone());
            state.phase = SessionPhase::Idle;
            drop(state);
            self.persist(&next).await;
        }
        outcome
    }

    /// Keeps an uncommitted buffer in the pending slot so the next start-up
    /// can commit it
    #[instrument(skip(self))]
    pub async fn on_unload(&self) -> Result<(), PracticeError> {
        let buffer = self.state.lock().await.buffer.clone();
        if let Some(buffer) = buffer {
            self.slots.save_current(&buffer).await?;
            if !buffer.is_empty() {
                self.slots.stash_pending(&buffer).await?;
                info!(session_id = %buffer.session_id, total = buffer.total, "Session stashed for recovery");
            }
        }
        Ok(())
    }

    /// Commits every pending session once, under its own deck and mode, and
    /// clears each one that lands. Running it again with nothing pending is a no-op.
    #[instrument(skip(self))]
    pub async fn recover_pending(&self) -> Vec<CommitOutcome> {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            return vec![CommitOutcome::AlreadyInFlight];
        };

        let pending = match self.slots.load_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Could not read pending sessions");
                return vec![CommitOutcome::Failed(SaveNotice::scratch(&e))];
            }
        };
        if pending.is_empty() {
            return Vec::new();
        }
        let Some(user) = self.auth.current_user().await else {
            debug!(pending = pending.len(), "Recovery waits for sign-in");
            return vec![CommitOutcome::Deferred];
        };

        let mut outcomes = Vec::with_capacity(pending.len());
        for entry in pending {
            if entry.is_empty() {
                self.settle_pending(&entry).await;
                continue;
            }

            let request = entry.to_commit_request(self.clock.now());
            let outcome = match self.target.commit(&user, &request).await {
                Ok(receipt) => {
                    self.settle_pending(&entry).await;
                    self.settle_current(&entry).await;
                    info!(session_id = %entry.session_id, deck = %entry.deck_name, "Pending session recovered");
                    CommitOutcome::Committed(receipt)
                }
                Err(e) => {
                    warn!(session_id = %entry.session_id, error = %e, "Pending session still not committed");
                    CommitOutcome::Failed(SaveNotice::from_error(&e))
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn commit_snapshot(&self, snapshot: &SessionBuffer) -> CommitOutcome {
        let Some(user) = self.auth.current_user().await else {
            debug!("No signed-in user, deferring commit");
            if let Err(e) = self.slots.stash_pending(snapshot).await {
                warn!(error = %e, "Could not stash deferred session");
            }
            return CommitOutcome::Deferred;
        };

        let request = snapshot.to_commit_request(self.clock.now());
        match self.target.commit(&user, &request).await {
            Ok(receipt) => {
                self.settle_pending(snapshot).await;
                debug!(commit_id = %snapshot.commit_id, "Buffer committed");
                CommitOutcome::Committed(receipt)
            }
            Err(e) => {
                warn!(commit_id = %snapshot.commit_id, error = %e, "Commit failed, keeping buffer");
                CommitOutcome::Failed(SaveNotice::from_error(&e))
            }
        }
    }

    async fn settle_current(&self, committed: &SessionBuffer) {
        let mut state = self.state.lock().await;
        let Some(buffer) = state.buffer.as_mut() else {
            return;
        };
        if buffer.session_id != committed.session_id || buffer.commit_id != committed.commit_id {
            return;
        }

        buffer.settle(committed);
        let snapshot = buffer.clone();
        if snapshot.is_empty() {
            state.phase = SessionPhase::Idle;
        }
        drop(state);
        self.persist(&snapshot).await;
    }

    async fn settle_pending(&self, committed: &SessionBuffer) {
        if let Err(e) = self.slots.settle_pending(committed).await {
            warn!(error = %e, "Could not clear pending session");
        }
    }

    async fn stash_current(&self) {
        let buffer = self.state.lock().await.buffer.clone();
        if let Some(buffer) = buffer.filter(|b| !b.is_empty()) {
            if let Err(e) = self.slots.stash_pending(&buffer).await {
                warn!(error = %e, "Could not stash session before deck switch");
            }
        }
    }

    async fn persist(&self, buffer: &SessionBuffer) {
        if let Err(e) = self.slots.save_current(buffer).await {
            warn!(error = %e, "Could not write current session slot");
        }
    }
}
