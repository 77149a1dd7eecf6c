use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::StreamExt;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::models::{LeaderboardScope, LeaderboardSnapshot};

/// The parts of a websocket a live board needs
#[async_trait]
pub trait SocketWrapper: Send {
    async fn send_message(&mut self, message: String) -> Result<(), SocketError>;

    /// Next text frame from the client, `None` once the connection is closed
    async fn receive_message(&mut self) -> Result<Option<String>, SocketError>;

    async fn close(&mut self) -> Result<(), SocketError>;
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Could not encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
impl SocketWrapper for WebSocket {
    async fn send_message(&mut self, message: String) -> Result<(), SocketError> {
        self.send(Message::Text(message))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }

    async fn receive_message(&mut self) -> Result<Option<String>, SocketError> {
        loop {
            match self.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Ping/pong are answered by axum
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SocketError::ReceiveFailed(e.to_string())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        self.send(Message::Close(None))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }
}

/// One client watching one board. Every frame is a full snapshot cut to the
/// client's `limit`, so a lagging receiver just skips ahead to the newest one.
pub struct LiveBoard {
    scope: LeaderboardScope,
    limit: usize,
    socket: Box<dyn SocketWrapper>,
    updates: broadcast::Receiver<LeaderboardSnapshot>,
}

impl LiveBoard {
    pub fn new(
        scope: LeaderboardScope,
        limit: usize,
        socket: Box<dyn SocketWrapper>,
        updates: broadcast::Receiver<LeaderboardSnapshot>,
    ) -> Self {
        Self {
            scope,
            limit,
            socket,
            updates,
        }
    }

    /// Sends `initial`, then every published snapshot until either side goes away
    pub async fn run(mut self, initial: LeaderboardSnapshot) -> Result<(), SocketError> {
        self.send(initial).await?;

        loop {
            tokio::select! {
                update = self.updates.recv() => {
                    match update {
                        Ok(snapshot) => self.send(snapshot).await?,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(scope = %self.scope, skipped, "Live board subscriber lagging");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                inbound = self.socket.receive_message() => {
                    match inbound {
                        Ok(Some(message)) => {
                            debug!(scope = %self.scope, message = %message, "Ignoring client message");
                        }
                        Ok(None) => break,
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        let _ = self.socket.close().await;
        debug!(scope = %self.scope, "Live board closed");
        Ok(())
    }

    async fn send(&mut self, mut snapshot: LeaderboardSnapshot) -> Result<(), SocketError> {
        snapshot.entries.truncate(self.limit);
        let message = serde_json::to_string(&snapshot)?;
        self.socket.send_message(message).await
    }
}
