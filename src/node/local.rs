//! Local Node
//!
//! Wraps this process's [`LogStore`] and stamps entries with the node's id.

use async_trait::async_trait;

use super::{Node, NodeInfo, NodeRole};
use crate::error::{Error, Result};
use crate::log::{EntryId, LogEntry, LogStore, Payload};

/// The node owned by this process
pub struct LocalNode {
    info: NodeInfo,
    store: LogStore,
}

impl LocalNode {
    /// Create a node with an empty log
    pub fn new(node_id: impl Into<String>, url: impl Into<String>, role: NodeRole) -> Self {
        Self {
            info: NodeInfo::new(node_id, url, role),
            store: LogStore::new(),
        }
    }

    /// Backing store
    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Allocate the next ordinal and commit a new entry (master only)
    pub async fn allocate(&self, payload: Payload, w: usize) -> Result<LogEntry> {
        let origin = self.info.node_id.clone();
        let entry = self
            .store
            .append_next(|id| LogEntry::new(id, payload, origin))
            .await?;
        Ok(entry.with_write_concern(w))
    }

    /// Insert an entry whose id was assigned upstream
    pub async fn insert(&self, mut entry: LogEntry) -> Result<LogEntry> {
        if entry.origin_node_id.is_empty() {
            entry.origin_node_id = self.info.node_id.clone();
        }
        self.store.append(entry).await
    }
}

#[async_trait]
impl Node for LocalNode {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    async fn healthy(&self) -> bool {
        true
    }

    async fn version(&self) -> Option<u64> {
        Some(self.store.version().await)
    }

    async fn get(&self, id: EntryId) -> Option<LogEntry> {
        self.store.get(id).await.ok()
    }

    async fn get_all(&self) -> Option<Vec<LogEntry>> {
        Some(self.store.get_all().await)
    }

    async fn append(&self, entry: LogEntry) -> Option<LogEntry> {
        match self.insert(entry.clone()).await {
            Ok(stored) => Some(stored),
            // Already holding the same entry counts as an ack
            Err(Error::DuplicateEntry(id)) => {
                let stored = self.store.stored(id).await.filter(|s| *s == entry);
                if stored.is_none() {
                    tracing::warn!("Entry {} on {} conflicts with the stored copy", id, self.info.node_id);
                }
                stored
            }
            Err(e) => {
                tracing::debug!("Local append on {} refused: {}", self.info.node_id, e);
                None
            }
        }
    }
}
