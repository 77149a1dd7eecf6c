use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::buffer::SessionBuffer;

/// Slot holding the buffer of the run in progress
pub const CURRENT_SLOT: &str = "n5study.session.current";
/// Slot holding buffers that still have to be committed
pub const PENDING_SLOT: &str = "n5study.session.pending";

#[derive(Debug, Error)]
pub enum ScratchError {
    #[error("Scratch storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scratch record is malformed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Small string key/value store that outlives the process
#[async_trait]
pub trait ScratchStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>, ScratchError>;
    async fn save(&self, key: &str, value: &str) -> Result<(), ScratchError>;
    async fn remove(&self, key: &str) -> Result<(), ScratchError>;
}

#[derive(Default)]
pub struct InMemoryScratch {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryScratch {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScratchStore for InMemoryScratch {
    async fn load(&self, key: &str) -> Result<Option<String>, ScratchError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), ScratchError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), ScratchError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// One JSON file per key under `dir`
pub struct FileScratch {
    dir: PathBuf,
}

impl FileScratch {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl ScratchStore for FileScratch {
    async fn load(&self, key: &str) -> Result<Option<String>, ScratchError> {
        match tokio::fs::read_to_string(self.path(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, value))]
    async fn save(&self, key: &str, value: &str) -> Result<(), ScratchError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        // Write then rename so a crash never leaves half a record behind
        let staging = self.dir.join(format!("{key}.json.tmp"));
        tokio::fs::write(&staging, value).await?;
        tokio::fs::rename(&staging, self.path(key)).await?;
        debug!(bytes = value.len(), "Scratch slot written");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), ScratchError> {
        match tokio::fs::remove_file(self.path(key)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Typed access to the current and pending session slots
#[derive(Clone)]
pub struct SessionSlots {
    store: Arc<dyn ScratchStore>,
}

impl SessionSlots {
    pub fn new(store: Arc<dyn ScratchStore>) -> Self {
        Self { store }
    }

    pub async fn load_current(&self) -> Result<Option<SessionBuffer>, ScratchError> {
        match self.store.load(CURRENT_SLOT).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn save_current(&self, buffer: &SessionBuffer) -> Result<(), ScratchError> {
        let raw = serde_json::to_string(buffer)?;
        self.store.save(CURRENT_SLOT, &raw).await
    }

    pub async fn load_pending(&self) -> Result<Vec<SessionBuffer>, ScratchError> {
        match self.store.load(PENDING_SLOT).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Adds `buffer` to the pending list, replacing an older copy of the same session
    pub async fn stash_pending(&self, buffer: &SessionBuffer) -> Result<(), ScratchError> {
        let mut pending = self.load_pending().await?;
        pending.retain(|p| p.session_id != buffer.session_id);
        pending.push(buffer.clone());
        self.write_pending(&pending).await
    }

    /// Removes the counts of `committed` from its pending copy. The entry is
    /// dropped once nothing is left in it.
    pub async fn settle_pending(&self, committed: &SessionBuffer) -> Result<(), ScratchError> {
        let mut pending = self.load_pending().await?;
        let mut changed = false;
        for entry in pending.iter_mut().filter(|p| {
            p.session_id == committed.session_id && p.commit_id == committed.commit_id
        }) {
            entry.settle(committed);
            changed = true;
        }
        if changed {
            pending.retain(|p| !p.is_empty());
            self.write_pending(&pending).await?;
        }
        Ok(())
    }

    async fn write_pending(&self, pending: &[SessionBuffer]) -> Result<(), ScratchError> {
        if pending.is_empty() {
            return self.store.remove(PENDING_SLOT).await;
        }
        let raw = serde_json::to_string(pending)?;
        self.store.save(PENDING_SLOT, &raw).await
    }
}
