use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::models::{LeaderboardScope, LeaderboardSnapshot};

const SCOPE_CAPACITY: usize = 100;

/// Live board snapshots, one broadcast channel per scope
#[derive(Debug, Clone, Default)]
pub struct LeaderboardFeed {
    channels: Arc<RwLock<HashMap<LeaderboardScope, broadcast::Sender<LeaderboardSnapshot>>>>,
}

impl LeaderboardFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether anyone is listening; publishers skip the board query otherwise
    pub async fn has_subscribers(&self, scope: &LeaderboardScope) -> bool {
        let channels = self.channels.read().await;
        channels
            .get(scope)
            .map(|sender| sender.receiver_count() > 0)
            .unwrap_or(false)
    }

    pub async fn publish(&self, snapshot: LeaderboardSnapshot) {
        let channels = self.channels.read().await;
        let scope = snapshot.scope.clone();

        match channels.get(&scope) {
            Some(sender) => match sender.send(snapshot) {
                Ok(receivers) => {
                    debug!(scope = %scope, receivers, "Leaderboard snapshot published");
                }
                Err(_) => {
                    debug!(scope = %scope, "Leaderboard snapshot published with no receivers");
                }
            },
            None => debug!(scope = %scope, "No live subscribers for scope"),
        }
    }

    pub async fn subscribe(&self, scope: &LeaderboardScope) -> broadcast::Receiver<LeaderboardSnapshot> {
        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(scope) {
                return sender.subscribe();
            }
        }

        debug!(scope = %scope, "Creating leaderboard channel for subscription");
        let mut channels = self.channels.write().await;
        channels
            .entry(scope.clone())
            .or_insert_with(|| broadcast::channel(SCOPE_CAPACITY).0)
            .subscribe()
    }

    /// Drops channels whose subscribers have all gone away
    pub async fn prune(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}
