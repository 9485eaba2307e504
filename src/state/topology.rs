//! Cluster Topology
//!
//! Tracks registered peers and their health. The registry is the only
//! state shared between client calls, health monitors and catch-up loops,
//! and every access goes through the single lock held here. The lock is
//! never held across a network call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::node::{Connector, LocalNode, Node, NodeInfo, NodeRole};
use crate::replication::protocol::PeerState;
use crate::replication::{
    CatchupConfig, CatchupSynchronizer, HealthConfig, HealthListener, HealthMonitor,
};

/// Health of a peer as judged by its monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Last probe succeeded
    Healthy,
    /// At least one recent probe failed
    Suspect,
    /// Too many consecutive probes failed; the peer is evicted
    Dead,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Healthy => write!(f, "HEALTHY"),
            Health::Suspect => write!(f, "SUSPECT"),
            Health::Dead => write!(f, "DEAD"),
        }
    }
}

/// Outcome of a discovery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The peer was registered and its loops started
    Added(NodeInfo),
    /// A peer with the same id is already registered
    AlreadyKnown(NodeInfo),
    /// The URL points back at this node
    Local,
}

struct Peer {
    node: Arc<dyn Node>,
    health: Health,
    registered_at: DateTime<Utc>,
    /// Stops this peer's monitor and catch-up loops
    cancel: CancellationToken,
}

/// Membership registry shared by the replication components
pub struct Topology {
    local: Arc<LocalNode>,
    connector: Arc<dyn Connector>,
    peers: RwLock<HashMap<String, Peer>>,
    master_id: RwLock<Option<String>>,
    health_config: HealthConfig,
    catchup_config: CatchupConfig,
    shutdown: CancellationToken,
}

impl Topology {
    /// Create a topology with no peers
    pub fn new(
        local: Arc<LocalNode>,
        connector: Arc<dyn Connector>,
        health_config: HealthConfig,
        catchup_config: CatchupConfig,
    ) -> Arc<Self> {
        let master_id = match local.role() {
            NodeRole::Master => Some(local.id().to_string()),
            NodeRole::Secondary => None,
        };

        Arc::new(Self {
            local,
            connector,
            peers: RwLock::new(HashMap::new()),
            master_id: RwLock::new(master_id),
            health_config,
            catchup_config,
            shutdown: CancellationToken::new(),
        })
    }

    /// This process's node
    pub fn local(&self) -> &Arc<LocalNode> {
        &self.local
    }

    /// Whether this process is the master
    pub fn is_master(&self) -> bool {
        self.local.role() == NodeRole::Master
    }

    /// Id of the master, if known
    pub async fn master_id(&self) -> Option<String> {
        self.master_id.read().await.clone()
    }

    /// URL of the master when it is a registered peer
    pub async fn master_url(&self) -> Option<String> {
        let master_id = self.master_id().await?;
        if master_id == self.local.id() {
            return None;
        }
        let peers = self.peers.read().await;
        peers.get(&master_id).map(|p| p.node.url().to_string())
    }

    /// Snapshot of the current peer handles
    pub async fn peers(&self) -> Vec<Arc<dyn Node>> {
        let peers = self.peers.read().await;
        peers.values().map(|p| Arc::clone(&p.node)).collect()
    }

    /// Number of registered peers
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether a peer id is registered
    pub async fn contains(&self, peer_id: &str) -> bool {
        self.peers.read().await.contains_key(peer_id)
    }

    /// Current health of a registered peer
    pub async fn health_of(&self, peer_id: &str) -> Option<Health> {
        self.peers.read().await.get(peer_id).map(|p| p.health)
    }

    /// Describe every registered peer
    pub async fn peer_states(&self) -> Vec<PeerState> {
        let peers = self.peers.read().await;
        let mut states: Vec<PeerState> = peers
            .values()
            .map(|p| PeerState {
                node_id: p.node.id().to_string(),
                url: p.node.url().to_string(),
                role: p.node.role(),
                health: p.health,
                registered_at: p.registered_at,
            })
            .collect();
        states.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        states
    }

    /// Discover the node at `url` and register it
    ///
    /// Duplicates and the local node itself are no-ops. Unreachable or
    /// unhealthy targets are rejected. Discovering the master from a
    /// secondary also registers this node with the master.
    pub async fn add_remote_node(self: &Arc<Self>, url: &str) -> Result<Registration> {
        let info = self
            .connector
            .handshake(url)
            .await
            .ok_or_else(|| Error::PeerUnavailable(url.to_string()))?;

        if info.node_id == self.local.id() {
            tracing::debug!("Skipping {} (that's us)", url);
            return Ok(Registration::Local);
        }
        if self.contains(&info.node_id).await {
            return Ok(Registration::AlreadyKnown(info));
        }

        let node = self.connector.connect(info.clone());
        if !node.healthy().await {
            return Err(Error::PeerUnhealthy(url.to_string()));
        }

        if !self.register(node).await {
            return Ok(Registration::AlreadyKnown(info));
        }

        if info.role == NodeRole::Master && !self.is_master() {
            if self.connector.introduce(&info.url, self.local.info()).await {
                tracing::info!("Registered with master {} at {}", info.node_id, info.url);
            } else {
                tracing::warn!("Master {} did not accept our registration", info.node_id);
            }
        }

        Ok(Registration::Added(info))
    }

    /// Register an already-resolved peer and start its loops
    ///
    /// Returns `false` if a peer with the same id is already registered.
    pub async fn register(self: &Arc<Self>, node: Arc<dyn Node>) -> bool {
        let peer_id = node.id().to_string();
        let cancel = self.shutdown.child_token();

        {
            let mut peers = self.peers.write().await;
            if peers.contains_key(&peer_id) {
                return false;
            }
            peers.insert(
                peer_id.clone(),
                Peer {
                    node: Arc::clone(&node),
                    health: Health::Healthy,
                    registered_at: Utc::now(),
                    cancel: cancel.clone(),
                },
            );
        }

        if node.role() == NodeRole::Master {
            let mut master_id = self.master_id.write().await;
            if let Some(previous) = master_id.as_ref().filter(|m| **m != peer_id) {
                tracing::warn!("Master changed from {} to {}", previous, peer_id);
            }
            *master_id = Some(peer_id.clone());
        }

        let listener: Arc<dyn HealthListener> = Arc::clone(self) as Arc<dyn HealthListener>;
        let monitor = HealthMonitor::new(Arc::clone(&node), self.health_config.clone(), listener);
        tokio::spawn(monitor.run(cancel.clone()));

        if self.is_master() {
            let sync = CatchupSynchronizer::new(
                Arc::clone(&self.local),
                Arc::clone(&node),
                self.catchup_config.clone(),
            );
            tokio::spawn(sync.run(cancel));
        }

        tracing::info!(
            "Registered peer {} ({}) at {}",
            peer_id,
            node.role(),
            node.url()
        );
        true
    }

    /// Remove a peer and stop its loops
    ///
    /// Dispatches already holding the peer's handle finish on their own and
    /// observe "no result" if the peer is gone.
    pub async fn evict(&self, peer_id: &str) -> bool {
        let removed = self.peers.write().await.remove(peer_id);
        let Some(peer) = removed else {
            return false;
        };
        peer.cancel.cancel();

        let mut master_id = self.master_id.write().await;
        if master_id.as_deref() == Some(peer_id) {
            tracing::warn!("Master {} evicted", peer_id);
            *master_id = None;
        }

        tracing::warn!("Evicted peer {} at {}", peer_id, peer.node.url());
        true
    }

    async fn set_health(&self, peer_id: &str, health: Health) {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get_mut(peer_id) {
            peer.health = health;
        }
    }

    /// Stop every background loop
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl HealthListener for Topology {
    async fn on_transition(&self, peer_id: &str, from: Health, to: Health) {
        tracing::info!("Peer {} health {} -> {}", peer_id, from, to);
        self.set_health(peer_id, to).await;
    }

    async fn on_dead(&self, peer_id: &str) {
        self.evict(peer_id).await;
    }
}
