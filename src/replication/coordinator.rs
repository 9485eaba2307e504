//! Quorum Coordinator
//!
//! Fans an operation out to every peer at once and releases the caller as
//! soon as the required number of peers answered successfully. Absent
//! answers never count, and dispatches that are still running when the
//! caller is released keep going in the background.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::time::Instant;

use super::QuorumConfig;
use crate::error::{Error, Result};
use crate::log::{EntryId, LogEntry};
use crate::node::Node;

/// Coordinates quorum writes and reads against a set of peers
#[derive(Debug, Clone, Default)]
pub struct QuorumCoordinator {
    config: QuorumConfig,
}

impl QuorumCoordinator {
    /// Create a coordinator
    pub fn new(config: QuorumConfig) -> Self {
        Self { config }
    }

    /// Fail fast when the membership cannot satisfy `required` acknowledgments
    pub fn check_peers(required: usize, available: usize) -> Result<()> {
        if required > available {
            return Err(Error::InsufficientPeers {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Run `op` against every peer concurrently and collect the first
    /// `required` successful results, tagged with the peer id.
    pub async fn fan_out<T, F, Fut>(
        &self,
        peers: Vec<Arc<dyn Node>>,
        required: usize,
        op: F,
    ) -> Result<Vec<(String, T)>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn Node>) -> Fut,
        Fut: Future<Output = Option<T>> + Send + 'static,
    {
        Self::check_peers(required, peers.len())?;

        let mut futs = FuturesUnordered::new();
        for peer in peers {
            let peer_id = peer.id().to_string();
            let call = op(peer);
            futs.push(tokio::spawn(async move { (peer_id, call.await) }));
        }

        if required == 0 {
            return Ok(Vec::new());
        }

        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        let mut successes = Vec::with_capacity(required);

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, futs.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        return Err(Error::Timeout {
                            reached: successes.len(),
                            required,
                        })
                    }
                },
                None => futs.next().await,
            };

            match next {
                Some(Ok((peer_id, Some(value)))) => {
                    successes.push((peer_id, value));
                    if successes.len() >= required {
                        break;
                    }
                }
                Some(Ok((peer_id, None))) => {
                    tracing::debug!("No result from peer {}", peer_id);
                }
                Some(Err(e)) => {
                    tracing::warn!("Dispatch task failed: {}", e);
                }
                None => {
                    return Err(Error::QuorumNotReached {
                        reached: successes.len(),
                        required,
                    })
                }
            }
        }

        Ok(successes)
    }

    /// Replicate an entry and wait for `required` acknowledgments
    ///
    /// Every acknowledgment must echo the submitted id.
    pub async fn replicate(
        &self,
        peers: Vec<Arc<dyn Node>>,
        entry: &LogEntry,
        required: usize,
    ) -> Result<usize> {
        let outgoing = entry.clone();
        let acks = self
            .fan_out(peers, required, move |peer| {
                let entry = outgoing.clone();
                async move { peer.append(entry).await }
            })
            .await?;

        for (peer, stored) in &acks {
            if stored.id != entry.id {
                tracing::error!(
                    "Replica {} stored entry {} as {}",
                    peer,
                    entry.id,
                    stored.id
                );
                return Err(Error::ReplicaIdMismatch {
                    peer: peer.clone(),
                    expected: entry.id,
                    actual: stored.id,
                });
            }
        }

        Ok(acks.len())
    }

    /// Collect the full logs of `required` peers
    pub async fn read_all(
        &self,
        peers: Vec<Arc<dyn Node>>,
        required: usize,
    ) -> Result<Vec<Vec<LogEntry>>> {
        let results = self
            .fan_out(peers, required, |peer| async move { peer.get_all().await })
            .await?;
        Ok(results.into_iter().map(|(_, entries)| entries).collect())
    }

    /// Collect one entry from `required` peers that have it
    pub async fn read_one(
        &self,
        peers: Vec<Arc<dyn Node>>,
        id: EntryId,
        required: usize,
    ) -> Result<Vec<Vec<LogEntry>>> {
        let results = self
            .fan_out(peers, required, move |peer| async move { peer.get(id).await })
            .await?;
        Ok(results.into_iter().map(|(_, entry)| vec![entry]).collect())
    }
}

/// Merge per-node observations by id and keep the plurality entry per id
///
/// Ids observed by fewer than `required` nodes fail the whole read. Ties go
/// to the candidate observed first, so callers list the local log first.
pub fn vote(observations: &[Vec<LogEntry>], required: usize) -> Result<Vec<LogEntry>> {
    let mut groups: BTreeMap<EntryId, Vec<(LogEntry, usize)>> = BTreeMap::new();
    for entries in observations {
        for entry in entries {
            let candidates = groups.entry(entry.id).or_default();
            match candidates.iter_mut().find(|(candidate, _)| candidate == entry) {
                Some((_, count)) => *count += 1,
                None => candidates.push((entry.clone(), 1)),
            }
        }
    }

    let mut agreed = Vec::with_capacity(groups.len());
    for (id, mut candidates) in groups {
        let observed: usize = candidates.iter().map(|(_, count)| count).sum();
        if observed < required {
            return Err(Error::NoConsensus {
                id,
                observed,
                required,
            });
        }
        if candidates.len() > 1 {
            tracing::warn!("Divergent copies of entry {}: {} variants", id, candidates.len());
        }

        let mut best = 0;
        for (i, (_, count)) in candidates.iter().enumerate() {
            if *count > candidates[best].1 {
                best = i;
            }
        }
        agreed.push(candidates.swap_remove(best).0);
    }

    Ok(agreed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::node::{LocalNode, NodeInfo, NodeRole};

    #[derive(Clone, Copy)]
    enum Behaviour {
        Ok,
        Delay(Duration),
        Fail,
        Hang,
        Lie,
    }

    struct FakeNode {
        inner: LocalNode,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl FakeNode {
        fn new(id: &str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                inner: LocalNode::new(id, format!("mem://{}", id), NodeRole::Secondary),
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        async fn gate(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Ok | Behaviour::Lie => true,
                Behaviour::Delay(d) => {
                    tokio::time::sleep(d).await;
                    true
                }
                Behaviour::Fail => false,
                Behaviour::Hang => std::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl Node for FakeNode {
        fn info(&self) -> &NodeInfo {
            self.inner.info()
        }
        async fn healthy(&self) -> bool {
            self.gate().await
        }
        async fn version(&self) -> Option<u64> {
            if self.gate().await { self.inner.version().await } else { None }
        }
        async fn get(&self, id: EntryId) -> Option<LogEntry> {
            if self.gate().await { Node::get(&self.inner, id).await } else { None }
        }
        async fn get_all(&self) -> Option<Vec<LogEntry>> {
            if self.gate().await { Node::get_all(&self.inner).await } else { None }
        }
        async fn append(&self, entry: LogEntry) -> Option<LogEntry> {
            if !self.gate().await {
                return None;
            }
            let mut stored = Node::append(&self.inner, entry).await?;
            if let Behaviour::Lie = self.behaviour {
                stored.id += 1;
            }
            Some(stored)
        }
    }

    fn as_peers(nodes: &[Arc<FakeNode>]) -> Vec<Arc<dyn Node>> {
        nodes.iter().map(|n| Arc::clone(n) as Arc<dyn Node>).collect()
    }

    fn entry(id: EntryId, msg: &str) -> LogEntry {
        LogEntry::new(id, LogEntry::message_payload(msg), "m")
    }

    fn coordinator(timeout_ms: u64) -> QuorumCoordinator {
        QuorumCoordinator::new(QuorumConfig {
            timeout: Some(Duration::from_millis(timeout_ms)),
        })
    }

    #[tokio::test]
    async fn test_insufficient_peers_dispatches_nothing() {
        let nodes = vec![FakeNode::new("s1", Behaviour::Ok)];
        let err = coordinator(1000)
            .replicate(as_peers(&nodes), &entry(0, "x"), 2)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InsufficientPeers { required: 2, available: 1 }));
        assert_eq!(nodes[0].calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_released_by_first_successes() {
        let nodes = vec![
            FakeNode::new("s1", Behaviour::Ok),
            FakeNode::new("s2", Behaviour::Hang),
        ];
        let acks = coordinator(5000)
            .replicate(as_peers(&nodes), &entry(0, "x"), 1)
            .await
            .unwrap();

        assert_eq!(acks, 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_count() {
        let nodes = vec![
            FakeNode::new("s1", Behaviour::Fail),
            FakeNode::new("s2", Behaviour::Delay(Duration::from_millis(20))),
        ];
        let coord = coordinator(5000);

        assert_eq!(coord.replicate(as_peers(&nodes), &entry(0, "x"), 1).await.unwrap(), 1);

        let err = coord
            .replicate(as_peers(&nodes), &entry(1, "y"), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuorumNotReached { reached: 1, required: 2 }));
    }

    #[tokio::test]
    async fn test_bounded_wait_times_out() {
        let nodes = vec![FakeNode::new("s1", Behaviour::Hang)];
        let err = coordinator(50)
            .replicate(as_peers(&nodes), &entry(0, "x"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { reached: 0, required: 1 }));
    }

    #[tokio::test]
    async fn test_unbounded_wait_without_timeout() {
        let nodes = vec![FakeNode::new("s1", Behaviour::Hang)];
        let coord = QuorumCoordinator::new(QuorumConfig { timeout: None });
        let pending = entry(0, "x");
        let wait = coord.replicate(as_peers(&nodes), &pending, 1);
        assert!(tokio::time::timeout(Duration::from_millis(100), wait).await.is_err());
    }

    #[tokio::test]
    async fn test_peer_already_holding_entry_acks() {
        let nodes = vec![
            FakeNode::new("s1", Behaviour::Ok),
            FakeNode::new("s2", Behaviour::Ok),
        ];
        let committed = entry(0, "x");
        // Catch-up got there before the live dispatch
        nodes[0].inner.insert(committed.clone()).await.unwrap();

        let acks = coordinator(1000)
            .replicate(as_peers(&nodes), &committed.clone().with_write_concern(3), 2)
            .await
            .unwrap();
        assert_eq!(acks, 2);
        assert_eq!(nodes[0].inner.store().version().await, 1);
    }

    #[tokio::test]
    async fn test_peer_holding_different_entry_does_not_ack() {
        let nodes = vec![FakeNode::new("s1", Behaviour::Ok)];
        nodes[0].inner.insert(entry(0, "stale")).await.unwrap();

        let err = coordinator(1000)
            .replicate(as_peers(&nodes), &entry(0, "x"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuorumNotReached { reached: 0, required: 1 }));
    }

    #[tokio::test]
    async fn test_replica_id_mismatch() {
        let nodes = vec![FakeNode::new("liar", Behaviour::Lie)];
        let err = coordinator(1000)
            .replicate(as_peers(&nodes), &entry(4, "x"), 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ReplicaIdMismatch { expected: 4, actual: 5, .. }
        ));
    }

    #[tokio::test]
    async fn test_zero_acks_still_replicates_in_background() {
        let nodes = vec![FakeNode::new("s1", Behaviour::Delay(Duration::from_millis(30)))];
        let acks = coordinator(1000)
            .replicate(as_peers(&nodes), &entry(0, "x"), 0)
            .await
            .unwrap();
        assert_eq!(acks, 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(nodes[0].inner.store().version().await, 1);
    }

    #[tokio::test]
    async fn test_read_one_skips_peers_missing_the_entry() {
        let nodes = vec![
            FakeNode::new("s1", Behaviour::Ok),
            FakeNode::new("s2", Behaviour::Ok),
        ];
        nodes[0].inner.insert(entry(0, "x")).await.unwrap();

        let coord = coordinator(1000);
        let found = coord.read_one(as_peers(&nodes), 0, 1).await.unwrap();
        let stored = nodes[0].inner.store().get(0).await.unwrap();
        assert_eq!(found, vec![vec![stored]]);

        let err = coord.read_one(as_peers(&nodes), 0, 2).await.unwrap_err();
        assert!(matches!(err, Error::QuorumNotReached { reached: 1, required: 2 }));
    }

    #[test]
    fn test_vote_picks_plurality() {
        let a = entry(0, "a");
        let b = entry(0, "b");
        let next = entry(1, "n");
        let observations = vec![
            vec![b.clone(), next.clone()],
            vec![a.clone(), next.clone()],
            vec![a.clone(), next.clone()],
        ];

        let agreed = vote(&observations, 3).unwrap();
        assert_eq!(agreed, vec![a, next]);
    }

    #[test]
    fn test_vote_tie_prefers_first_observation() {
        let local = entry(0, "local");
        let remote = entry(0, "remote");
        let agreed = vote(&[vec![local.clone()], vec![remote]], 2).unwrap();
        assert_eq!(agreed, vec![local]);
    }

    #[test]
    fn test_vote_refuses_underobserved_ids() {
        let observations = vec![vec![entry(0, "a"), entry(1, "b")], vec![entry(0, "a")]];
        let err = vote(&observations, 2).unwrap_err();
        assert!(matches!(err, Error::NoConsensus { id: 1, observed: 1, required: 2 }));

        assert_eq!(vote(&observations, 1).unwrap().len(), 2);
        assert!(vote(&[], 3).unwrap().is_empty());
    }
}
