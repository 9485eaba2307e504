//! rlog Error Types

use thiserror::Error;

use crate::log::EntryId;

/// Result type alias for rlog operations
pub type Result<T> = std::result::Result<T, Error>;

/// rlog error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Log store errors
    #[error("Entry {0} already exists")]
    DuplicateEntry(EntryId),

    #[error("Entry {0} not found")]
    NotFound(EntryId),

    // Quorum errors
    #[error("Invalid concern: {0}")]
    InvalidConcern(String),

    #[error("Insufficient peers: {required} acknowledgments required, {available} peers registered")]
    InsufficientPeers { required: usize, available: usize },

    #[error("Quorum not reached: {reached}/{required}")]
    QuorumNotReached { reached: usize, required: usize },

    #[error("Quorum wait timed out: {reached}/{required}")]
    Timeout { reached: usize, required: usize },

    #[error("Replica {peer} acknowledged entry {actual}, expected {expected}")]
    ReplicaIdMismatch {
        peer: String,
        expected: EntryId,
        actual: EntryId,
    },

    #[error("No consensus on entry {id}: {observed}/{required} observations")]
    NoConsensus {
        id: EntryId,
        observed: usize,
        required: usize,
    },

    // Topology errors
    #[error("Not master: current master is {}", .0.as_deref().unwrap_or("unknown"))]
    NotMaster(Option<String>),

    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),

    #[error("Peer unhealthy: {0}")]
    PeerUnhealthy(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::QuorumNotReached { .. } | Error::Network(_)
        )
    }

    /// Stable machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG",
            Error::DuplicateEntry(_) => "DUPLICATE_ENTRY",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidConcern(_) => "INVALID_CONCERN",
            Error::InsufficientPeers { .. } => "INSUFFICIENT_PEERS",
            Error::QuorumNotReached { .. } => "QUORUM_NOT_REACHED",
            Error::Timeout { .. } => "TIMEOUT",
            Error::ReplicaIdMismatch { .. } => "REPLICA_ID_MISMATCH",
            Error::NoConsensus { .. } => "NO_CONSENSUS",
            Error::NotMaster(_) => "NOT_MASTER",
            Error::PeerUnavailable(_) => "PEER_UNAVAILABLE",
            Error::PeerUnhealthy(_) => "PEER_UNHEALTHY",
            Error::Network(_) => "NETWORK",
            Error::Io(_) => "IO",
            Error::Internal(_) => "INTERNAL",
        }
    }
}
