//! Replication Module
//!
//! Quorum fan-out, peer health supervision, background catch-up, and the
//! client-facing replicated log that ties them to the topology.

pub mod protocol;
mod coordinator;
mod health;
mod catchup;
mod rlog;

pub use coordinator::{vote, QuorumCoordinator};
pub use health::{HealthListener, HealthMonitor, HealthTracker, Transition};
pub use catchup::{CatchupSynchronizer, SyncOutcome};
pub use rlog::ReplicatedLog;

use std::time::Duration;

/// Configuration for quorum waits
#[derive(Debug, Clone)]
pub struct QuorumConfig {
    /// Upper bound on a quorum wait; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_millis(5000)),
        }
    }
}

/// Configuration for per-peer health monitoring
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Delay between probes while the peer is healthy
    pub probe_interval: Duration,
    /// Cap on the backed-off delay
    pub max_probe_interval: Duration,
    /// Bound on a single probe
    pub probe_timeout: Duration,
    /// Failed probes tolerated before the peer is declared dead
    pub max_retries: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_millis(1000),
            max_probe_interval: Duration::from_millis(8000),
            probe_timeout: Duration::from_millis(500),
            max_retries: 3,
        }
    }
}

/// Configuration for per-peer catch-up
#[derive(Debug, Clone)]
pub struct CatchupConfig {
    /// Delay between reconciliation cycles
    pub interval: Duration,
    /// Cap on the delay after consecutive unreachable cycles
    pub max_interval: Duration,
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_interval: Duration::from_millis(10000),
        }
    }
}

/// Delay after `failures` consecutive misses: doubles from `base`, capped at `max`
pub(crate) fn backoff(base: Duration, max: Duration, failures: u32) -> Duration {
    let factor = 1u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}
