//! Peer Health Monitoring
//!
//! One supervision loop per peer. A failed probe makes the peer suspect,
//! `max_retries + 1` consecutive failures make it dead, and any success
//! makes it healthy again. The probe interval doubles per consecutive
//! failure up to a cap and resets on success. A dead peer is reported once
//! and never probed again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{backoff, HealthConfig};
use crate::node::Node;
use crate::state::Health;

/// A change in a peer's health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Health,
    pub to: Health,
}

/// Receives health changes from monitors
#[async_trait]
pub trait HealthListener: Send + Sync {
    async fn on_transition(&self, peer_id: &str, from: Health, to: Health);

    /// Called exactly once, when the peer is declared dead
    async fn on_dead(&self, peer_id: &str);
}

/// Health state machine for a single peer
#[derive(Debug, Clone)]
pub struct HealthTracker {
    health: Health,
    failures: u32,
    config: HealthConfig,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            health: Health::Healthy,
            failures: 0,
            config,
        }
    }

    pub fn health(&self) -> Health {
        self.health
    }

    /// Consecutive failed probes
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay before the next probe
    pub fn next_delay(&self) -> Duration {
        backoff(
            self.config.probe_interval,
            self.config.max_probe_interval,
            self.failures,
        )
    }

    pub fn record_success(&mut self) -> Option<Transition> {
        if self.health == Health::Dead {
            return None;
        }
        self.failures = 0;
        self.move_to(Health::Healthy)
    }

    pub fn record_failure(&mut self) -> Option<Transition> {
        if self.health == Health::Dead {
            return None;
        }
        self.failures += 1;
        if self.failures > self.config.max_retries {
            self.move_to(Health::Dead)
        } else {
            self.move_to(Health::Suspect)
        }
    }

    fn move_to(&mut self, to: Health) -> Option<Transition> {
        if self.health == to {
            return None;
        }
        let from = std::mem::replace(&mut self.health, to);
        Some(Transition { from, to })
    }
}

/// Supervision loop for one peer
pub struct HealthMonitor {
    node: Arc<dyn Node>,
    tracker: HealthTracker,
    probe_timeout: Duration,
    listener: Arc<dyn HealthListener>,
}

impl HealthMonitor {
    pub fn new(
        node: Arc<dyn Node>,
        config: HealthConfig,
        listener: Arc<dyn HealthListener>,
    ) -> Self {
        Self {
            node,
            probe_timeout: config.probe_timeout,
            tracker: HealthTracker::new(config),
            listener,
        }
    }

    /// Probe until the peer is dead or `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let peer_id = self.node.id().to_string();
        tracing::debug!("Health monitor started for {}", peer_id);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.tracker.next_delay()) => {}
            }

            let alive = tokio::select! {
                _ = cancel.cancelled() => break,
                probe = tokio::time::timeout(self.probe_timeout, self.node.healthy()) => {
                    probe.unwrap_or(false)
                }
            };

            let transition = if alive {
                self.tracker.record_success()
            } else {
                tracing::debug!(
                    "Probe of {} failed ({} consecutive)",
                    peer_id,
                    self.tracker.failures() + 1
                );
                self.tracker.record_failure()
            };

            if let Some(t) = transition {
                self.listener.on_transition(&peer_id, t.from, t.to).await;
            }

            if self.tracker.health() == Health::Dead {
                tracing::warn!("Peer {} is dead after {} failed probes", peer_id, self.tracker.failures());
                self.listener.on_dead(&peer_id).await;
                break;
            }
        }

        tracing::debug!("Health monitor stopped for {}", peer_id);
    }
}
