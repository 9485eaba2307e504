//! Node Module
//!
//! The operation surface shared by the local node and remote peers.
//! Every operation returns `None` when the node cannot answer, and callers
//! never distinguish a crashed peer from a slow one.

mod local;
mod remote;

pub use local::LocalNode;
pub use remote::{HttpConnector, RemoteNodeProxy};

use serde::{Deserialize, Serialize};

use crate::log::{EntryId, LogEntry};

/// Role of a node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Allocates ids and coordinates writes
    Master,
    /// Receives entries from the master
    Secondary,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Master => write!(f, "MASTER"),
            NodeRole::Secondary => write!(f, "SECONDARY"),
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "master" => Ok(NodeRole::Master),
            "secondary" => Ok(NodeRole::Secondary),
            other => Err(crate::Error::Config(format!("unknown role '{}'", other))),
        }
    }
}

/// Identity of a node: fixed for its whole lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub url: String,
    pub role: NodeRole,
}

impl NodeInfo {
    pub fn new(node_id: impl Into<String>, url: impl Into<String>, role: NodeRole) -> Self {
        Self {
            node_id: node_id.into(),
            url: url.into(),
            role,
        }
    }
}

/// Operations every node supports, local or remote
#[async_trait::async_trait]
pub trait Node: Send + Sync {
    /// Stable node identity
    fn info(&self) -> &NodeInfo;

    fn id(&self) -> &str {
        &self.info().node_id
    }

    fn role(&self) -> NodeRole {
        self.info().role
    }

    fn url(&self) -> &str {
        &self.info().url
    }

    /// Liveness probe
    async fn healthy(&self) -> bool;

    /// Number of stored entries
    async fn version(&self) -> Option<u64>;

    /// Fetch one visible entry
    async fn get(&self, id: EntryId) -> Option<LogEntry>;

    /// Fetch all visible entries in ascending id order
    async fn get_all(&self) -> Option<Vec<LogEntry>>;

    /// Store an entry under its own id and return what was stored
    async fn append(&self, entry: LogEntry) -> Option<LogEntry>;
}

/// Resolves peers by URL for discovery
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Ask the node at `url` who it is
    async fn handshake(&self, url: &str) -> Option<NodeInfo>;

    /// Build a handle for a resolved peer
    fn connect(&self, info: NodeInfo) -> std::sync::Arc<dyn Node>;

    /// Announce `local` to the master at `master_url`
    async fn introduce(&self, master_url: &str, local: &NodeInfo) -> bool;
}
