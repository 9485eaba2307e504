//! In-memory Log Store
//!
//! Append-only keyed store of log entries. Entries are inserted at most
//! once per id. Readers only see the dense prefix `[0..watermark)`, so an
//! entry that arrived ahead of its predecessor stays hidden until the gap
//! is filled.

use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::entry::{EntryId, LogEntry};
use crate::error::{Error, Result};

#[derive(Default)]
struct StoreInner {
    entries: BTreeMap<EntryId, LogEntry>,
    /// Length of the dense id prefix
    watermark: EntryId,
}

impl StoreInner {
    fn insert(&mut self, mut entry: LogEntry) -> Result<LogEntry> {
        if self.entries.contains_key(&entry.id) {
            return Err(Error::DuplicateEntry(entry.id));
        }
        entry.write_concern = None;
        self.entries.insert(entry.id, entry.clone());
        while self.entries.contains_key(&self.watermark) {
            self.watermark += 1;
        }
        Ok(entry)
    }

    fn next_id(&self) -> EntryId {
        self.entries.keys().next_back().map(|id| id + 1).unwrap_or(0)
    }
}

/// Append-only log store
#[derive(Default)]
pub struct LogStore {
    inner: RwLock<StoreInner>,
}

impl LogStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry under its own id
    ///
    /// Fails with [`Error::DuplicateEntry`] if the id is already stored, in
    /// which case the store is left unchanged.
    pub async fn append(&self, entry: LogEntry) -> Result<LogEntry> {
        self.inner.write().await.insert(entry)
    }

    /// Allocate the next ordinal and insert the entry built for it
    ///
    /// Allocation and insertion happen under one lock so concurrent writers
    /// always receive distinct, increasing ids.
    pub async fn append_next<F>(&self, build: F) -> Result<LogEntry>
    where
        F: FnOnce(EntryId) -> LogEntry,
    {
        let mut inner = self.inner.write().await;
        let id = inner.next_id();
        let entry = build(id);
        if entry.id != id {
            return Err(Error::Internal(format!(
                "allocated id {} but entry carries {}",
                id, entry.id
            )));
        }
        inner.insert(entry)
    }

    /// Get a visible entry by id
    pub async fn get(&self, id: EntryId) -> Result<LogEntry> {
        let inner = self.inner.read().await;
        if id >= inner.watermark {
            return Err(Error::NotFound(id));
        }
        inner.entries.get(&id).cloned().ok_or(Error::NotFound(id))
    }

    /// All visible entries in ascending id order
    pub async fn get_all(&self) -> Vec<LogEntry> {
        let inner = self.inner.read().await;
        inner
            .entries
            .range(..inner.watermark)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Get a stored entry by id, even if it sits beyond a gap
    pub async fn stored(&self, id: EntryId) -> Option<LogEntry> {
        self.inner.read().await.entries.get(&id).cloned()
    }

    /// Whether an id is stored (visible or not)
    pub async fn contains(&self, id: EntryId) -> bool {
        self.inner.read().await.entries.contains_key(&id)
    }

    /// Next dense ordinal (master only)
    pub async fn next_id(&self) -> EntryId {
        self.inner.read().await.next_id()
    }

    /// Number of stored entries
    pub async fn version(&self) -> u64 {
        self.inner.read().await.entries.len() as u64
    }

    /// Length of the visible prefix
    pub async fn watermark(&self) -> EntryId {
        self.inner.read().await.watermark
    }
}
