//! Replicated Log
//!
//! Client-facing operations. Writes are ordered by the master and fanned
//! out with write concern `w`, reads are answered locally or by a vote over
//! `r` nodes.

use std::sync::Arc;

use super::coordinator::{vote, QuorumCoordinator};
use super::protocol::{ClusterResponse, InfoResponse};
use crate::error::{Error, Result};
use crate::log::{EntryId, LogEntry, Payload};
use crate::node::Node;
use crate::state::Topology;

/// The replicated log as seen by clients of this node
#[derive(Clone)]
pub struct ReplicatedLog {
    topology: Arc<Topology>,
    coordinator: QuorumCoordinator,
}

impl ReplicatedLog {
    pub fn new(topology: Arc<Topology>, coordinator: QuorumCoordinator) -> Self {
        Self {
            topology,
            coordinator,
        }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Append a new entry and wait for `w - 1` secondaries to acknowledge it
    ///
    /// The entry is committed on the master before dispatch. If the quorum
    /// fails afterwards the error is returned but the entry stays, and
    /// catch-up delivers it later.
    pub async fn append(&self, payload: Payload, w: usize) -> Result<LogEntry> {
        if w == 0 {
            return Err(Error::InvalidConcern("write concern must be at least 1".into()));
        }
        if !self.topology.is_master() {
            return Err(Error::NotMaster(self.topology.master_url().await));
        }

        let peers = self.topology.peers().await;
        let required = w - 1;
        QuorumCoordinator::check_peers(required, peers.len())?;

        let entry = self.topology.local().allocate(payload, w).await?;
        tracing::debug!(
            "Allocated entry {} (w={}, {} peers)",
            entry.id,
            w,
            peers.len()
        );

        if let Err(e) = self.coordinator.replicate(peers, &entry, required).await {
            tracing::warn!("Entry {} committed locally but replication failed: {}", entry.id, e);
            return Err(e);
        }

        Ok(entry)
    }

    /// Store an entry whose id was assigned by the master
    pub async fn append_replica(&self, entry: LogEntry) -> Result<LogEntry> {
        tracing::trace!("Replica append of entry {}", entry.id);
        self.topology.local().insert(entry).await
    }

    /// Fetch one entry with read concern `r`
    pub async fn get(&self, id: EntryId, r: usize) -> Result<LogEntry> {
        Self::check_read_concern(r)?;
        let local = self.topology.local().store().get(id).await;
        if r == 1 {
            return local;
        }

        let mut observations: Vec<Vec<LogEntry>> = local.into_iter().map(|e| vec![e]).collect();
        let peers = self.topology.peers().await;
        observations.extend(self.coordinator.read_one(peers, id, r - 1).await?);

        vote(&observations, r)?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or(Error::NotFound(id))
    }

    /// Fetch every entry with read concern `r`
    pub async fn get_all(&self, r: usize) -> Result<Vec<LogEntry>> {
        Self::check_read_concern(r)?;
        let local = self.topology.local().store().get_all().await;
        if r == 1 {
            return Ok(local);
        }

        let peers = self.topology.peers().await;
        let mut observations = vec![local];
        observations.extend(self.coordinator.read_all(peers, r - 1).await?);
        vote(&observations, r)
    }

    /// Identity and data version of this node
    pub async fn info(&self) -> InfoResponse {
        let local = self.topology.local();
        InfoResponse {
            node_id: local.id().to_string(),
            url: local.url().to_string(),
            role: local.role(),
            version: local.store().version().await,
        }
    }

    /// This node's view of the cluster
    pub async fn cluster(&self) -> ClusterResponse {
        ClusterResponse {
            local: self.info().await,
            master_id: self.topology.master_id().await,
            peers: self.topology.peer_states().await,
        }
    }

    fn check_read_concern(r: usize) -> Result<()> {
        if r == 0 {
            return Err(Error::InvalidConcern("read concern must be at least 1".into()));
        }
        Ok(())
    }
}
