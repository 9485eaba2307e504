//! rlog - Replicated Append-Only Log
//!
//! A small replicated log with a fixed master and tunable consistency.
//! Clients choose a write concern `w` and a read concern `r` per request.
//!
//! # Architecture
//!
//! The master assigns dense, totally ordered ids and commits each entry
//! locally before fanning it out to the secondaries. A write returns once
//! `w - 1` secondaries acknowledged it. Reads with `r > 1` collect `r - 1`
//! peer views and vote per id.
//!
//! # Features
//!
//! - Per-request write and read concern with bounded quorum waits
//! - Per-peer health monitoring with adaptive probe backoff and eviction
//! - Background catch-up that replays missing entries in id order
//! - Peer discovery and self-registration with the master
//! - HTTP API and control CLI

pub mod config;
pub mod error;
pub mod log;
pub mod node;
pub mod state;
pub mod replication;
pub mod api;

pub use config::RlogConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::RlogConfig;
    pub use crate::error::{Error, Result};
    pub use crate::log::{EntryId, LogEntry, LogStore, Payload};
    pub use crate::node::{Connector, HttpConnector, LocalNode, Node, NodeInfo, NodeRole};
    pub use crate::replication::{QuorumCoordinator, ReplicatedLog};
    pub use crate::state::{Health, Topology};
}
