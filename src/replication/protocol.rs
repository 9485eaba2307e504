//! Replication Protocol
//!
//! JSON bodies exchanged between nodes and with clients over HTTP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::log::{LogEntry, Payload};
use crate::node::{NodeInfo, NodeRole};
use crate::state::Health;

/// Client append request for `POST /log`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppendRequest {
    /// Entry payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    /// Legacy single-message body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Write concern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<usize>,
}

impl AppendRequest {
    pub fn new(payload: Payload, w: usize) -> Self {
        Self {
            payload: Some(payload),
            msg: None,
            w: Some(w),
        }
    }

    /// Resolve the body into a payload, folding a legacy `msg` into it
    pub fn into_payload(self) -> Payload {
        let mut payload = self.payload.unwrap_or_default();
        if let Some(msg) = self.msg {
            payload.insert("msg".to_string(), serde_json::Value::String(msg));
        }
        payload
    }

    pub fn write_concern(&self) -> usize {
        self.w.unwrap_or(1)
    }
}

/// Read concern query string (`?r=<n>`)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReadQuery {
    #[serde(default)]
    pub r: Option<usize>,
}

impl ReadQuery {
    pub fn read_concern(&self) -> usize {
        self.r.unwrap_or(1)
    }
}

/// Response for `GET /logs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub entries: Vec<LogEntry>,
}

/// Response for `GET /info`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub node_id: String,
    #[serde(default)]
    pub url: String,
    pub role: NodeRole,
    pub version: u64,
}

impl InfoResponse {
    /// Identity of the responding node, addressed by the URL it was reached at
    ///
    /// The self-reported URL is only used when no dialed URL is known; a node
    /// bound to `0.0.0.0` reports a loopback address that is useless remotely.
    pub fn node_info(&self, reached_at: &str) -> NodeInfo {
        let reached_at = reached_at.trim_end_matches('/');
        let url = if reached_at.is_empty() {
            self.url.clone()
        } else {
            reached_at.to_string()
        };
        NodeInfo::new(self.node_id.clone(), url, self.role)
    }
}

/// Body for `POST /register`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<NodeRole>,
    /// Legacy bodies sent the host in `url` and the port separately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl RegisterRequest {
    pub fn from_info(info: &NodeInfo) -> Self {
        Self {
            node_id: Some(info.node_id.clone()),
            url: info.url.clone(),
            role: Some(info.role),
            port: None,
        }
    }

    /// URL the registering node can be reached at
    pub fn peer_url(&self) -> String {
        let base = if self.url.contains("://") {
            self.url.clone()
        } else {
            format!("http://{}", self.url)
        };
        match self.port {
            Some(port) => format!("{}:{}", base.trim_end_matches('/'), port),
            None => base,
        }
    }
}

/// Response for `POST /register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub registered: bool,
    pub node_id: String,
}

/// Response for `GET /healthcheck`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
}

/// One peer as seen by the local topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerState {
    pub node_id: String,
    pub url: String,
    pub role: NodeRole,
    pub health: Health,
    pub registered_at: DateTime<Utc>,
}

/// Response for `GET /cluster/nodes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterResponse {
    pub local: InfoResponse,
    pub master_id: Option<String>,
    pub peers: Vec<PeerState>,
}

/// Error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
