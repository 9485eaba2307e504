//! Background Catch-up
//!
//! Runs on the master, one loop per peer. Each cycle compares data versions
//! and replays whatever the lagging side is missing, in ascending id order.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{backoff, CatchupConfig};
use crate::log::{EntryId, LogEntry};
use crate::node::{LocalNode, Node};

/// Result of one reconciliation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    InSync,
    /// Entries re-appended to the peer
    Pushed(usize),
    /// Entries adopted from the peer
    Pulled(usize),
    Unreachable,
}

/// Reconciles the local log with one peer
pub struct CatchupSynchronizer {
    local: Arc<LocalNode>,
    peer: Arc<dyn Node>,
    config: CatchupConfig,
}

impl CatchupSynchronizer {
    pub fn new(local: Arc<LocalNode>, peer: Arc<dyn Node>, config: CatchupConfig) -> Self {
        Self {
            local,
            peer,
            config,
        }
    }

    /// Run a single reconciliation cycle
    pub async fn sync_once(&self) -> SyncOutcome {
        let Some(remote_version) = self.peer.version().await else {
            return SyncOutcome::Unreachable;
        };
        let local_version = self.local.store().version().await;

        if local_version == remote_version {
            return SyncOutcome::InSync;
        }

        let Some(remote_entries) = self.peer.get_all().await else {
            return SyncOutcome::Unreachable;
        };

        if local_version > remote_version {
            self.push_missing(remote_entries.iter().map(|e| e.id).collect())
                .await
        } else {
            self.pull_unknown(remote_entries).await
        }
    }

    async fn push_missing(&self, known: HashSet<EntryId>) -> SyncOutcome {
        let mut pushed = 0;
        for entry in self.local.store().get_all().await {
            if known.contains(&entry.id) {
                continue;
            }
            let id = entry.id;
            match self.peer.append(entry).await {
                Some(_) => pushed += 1,
                None => {
                    tracing::debug!(
                        "Catch-up push of entry {} to {} failed, stopping cycle",
                        id,
                        self.peer.id()
                    );
                    break;
                }
            }
        }
        SyncOutcome::Pushed(pushed)
    }

    async fn pull_unknown(&self, remote_entries: Vec<LogEntry>) -> SyncOutcome {
        let mut pulled = 0;
        for entry in remote_entries {
            if self.local.store().contains(entry.id).await {
                continue;
            }
            let id = entry.id;
            match self.local.insert(entry).await {
                Ok(_) => pulled += 1,
                Err(e) => tracing::debug!("Skipping entry {} from {}: {}", id, self.peer.id(), e),
            }
        }
        if pulled > 0 {
            tracing::warn!(
                "Peer {} was ahead of this master, adopted {} unknown entries",
                self.peer.id(),
                pulled
            );
        }
        SyncOutcome::Pulled(pulled)
    }

    /// Reconcile until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let peer_id = self.peer.id().to_string();
        tracing::debug!("Catch-up started for {}", peer_id);
        let mut misses = 0u32;

        loop {
            let delay = backoff(self.config.interval, self.config.max_interval, misses);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.sync_once() => outcome,
            };

            match outcome {
                SyncOutcome::Unreachable => misses = misses.saturating_add(1),
                SyncOutcome::InSync => misses = 0,
                SyncOutcome::Pushed(n) | SyncOutcome::Pulled(n) => {
                    misses = 0;
                    if n > 0 {
                        tracing::info!("Catch-up with {}: {:?}", peer_id, outcome);
                    }
                }
            }
        }

        tracing::debug!("Catch-up stopped for {}", peer_id);
    }
}
