//! rlog Configuration
//!
//! This module provides configuration structures for an rlog node. Every
//! field has a default, so an empty file is a valid single-node master.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::node::NodeRole;
use crate::replication::{CatchupConfig, HealthConfig, QuorumConfig};

/// Main rlog configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RlogConfig {
    /// Node-specific configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Cluster membership and quorum configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Peer health monitoring
    #[serde(default)]
    pub health: HealthSettings,

    /// Background catch-up
    #[serde(default)]
    pub catchup: CatchupSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier (generated at startup when empty)
    #[serde(default)]
    pub id: String,

    /// Fixed role of this node
    #[serde(default = "default_role")]
    pub role: NodeRole,

    /// Address to bind the HTTP server
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// URL other nodes use to reach this one
    #[serde(default)]
    pub advertise_url: Option<String>,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// URL of the master (secondaries only)
    #[serde(default)]
    pub master: Option<String>,

    /// URLs of secondaries to discover at startup
    #[serde(default)]
    pub secondaries: Vec<String>,

    /// Bound on a quorum wait in milliseconds (0 = wait indefinitely)
    #[serde(default = "default_quorum_timeout_ms")]
    pub quorum_timeout_ms: u64,

    /// Timeout for peer requests in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Health probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    #[serde(default = "default_max_probe_interval_ms")]
    pub max_probe_interval_ms: u64,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Failed probes tolerated before a peer is declared dead
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Catch-up configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchupSettings {
    #[serde(default = "default_catchup_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_catchup_max_interval_ms")]
    pub max_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_role() -> NodeRole {
    NodeRole::Master
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_quorum_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_probe_interval_ms() -> u64 {
    1000
}

fn default_max_probe_interval_ms() -> u64 {
    8000
}

fn default_probe_timeout_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    3
}

fn default_catchup_interval_ms() -> u64 {
    1000
}

fn default_catchup_max_interval_ms() -> u64 {
    10000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            role: default_role(),
            bind_address: default_bind_address(),
            advertise_url: None,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            master: None,
            secondaries: Vec::new(),
            quorum_timeout_ms: default_quorum_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            max_probe_interval_ms: default_max_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for CatchupSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_catchup_interval_ms(),
            max_interval_ms: default_catchup_max_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RlogConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RlogConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: RlogConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
        }

        match (self.node.role, &self.cluster.master) {
            (NodeRole::Secondary, None) => {
                return Err(crate::Error::Config(
                    "a secondary needs cluster.master".into(),
                ));
            }
            (NodeRole::Master, Some(_)) => {
                return Err(crate::Error::Config(
                    "a master cannot have cluster.master set".into(),
                ));
            }
            _ => {}
        }

        if self.cluster.request_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "cluster.request_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.health.probe_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "health.probe_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.health.max_probe_interval_ms < self.health.probe_interval_ms {
            return Err(crate::Error::Config(
                "health.max_probe_interval_ms is below health.probe_interval_ms".into(),
            ));
        }

        if self.catchup.max_interval_ms < self.catchup.interval_ms {
            return Err(crate::Error::Config(
                "catchup.max_interval_ms is below catchup.interval_ms".into(),
            ));
        }

        Ok(())
    }

    /// Fill in a random node id when none is configured
    pub fn ensure_node_id(&mut self) -> &str {
        if self.node.id.is_empty() {
            self.node.id = uuid::Uuid::new_v4().to_string();
        }
        &self.node.id
    }

    /// Get the advertised URL (derived from the bind address if not set)
    pub fn advertise_url(&self) -> String {
        if let Some(url) = &self.node.advertise_url {
            return url.trim_end_matches('/').to_string();
        }
        let bind = self.node.bind_address.replace("0.0.0.0", "127.0.0.1");
        format!("http://{}", bind)
    }

    /// Peers to discover at startup, master first
    pub fn discovery_targets(&self) -> Vec<String> {
        self.cluster
            .master
            .iter()
            .chain(self.cluster.secondaries.iter())
            .cloned()
            .collect()
    }

    /// Get the peer request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.request_timeout_ms)
    }

    pub fn quorum_config(&self) -> QuorumConfig {
        QuorumConfig {
            timeout: match self.cluster.quorum_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            probe_interval: Duration::from_millis(self.health.probe_interval_ms),
            max_probe_interval: Duration::from_millis(self.health.max_probe_interval_ms),
            probe_timeout: Duration::from_millis(self.health.probe_timeout_ms),
            max_retries: self.health.max_retries,
        }
    }

    pub fn catchup_config(&self) -> CatchupConfig {
        CatchupConfig {
            interval: Duration::from_millis(self.catchup.interval_ms),
            max_interval: Duration::from_millis(self.catchup.max_interval_ms),
        }
    }
}
