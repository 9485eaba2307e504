//! End-to-end tests: real nodes talking HTTP on ephemeral localhost ports.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use rlog::api::HttpServer;
use rlog::log::LogEntry;
use rlog::node::{Connector, HttpConnector, LocalNode, Node, NodeInfo, NodeRole};
use rlog::replication::protocol::{InfoResponse, LogsResponse};
use rlog::replication::{CatchupConfig, HealthConfig, QuorumConfig, QuorumCoordinator, ReplicatedLog};
use rlog::state::{Registration, Topology};

struct TestNode {
    url: String,
    topology: Arc<Topology>,
    shutdown: CancellationToken,
}

impl TestNode {
    async fn start(id: &str, role: NodeRole) -> Result<Self> {
        Self::start_advertising(id, role, None).await
    }

    /// Start a node that reports `advertise` as its own URL instead of its real one
    async fn start_advertising(id: &str, role: NodeRole, advertise: Option<&str>) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let advertised = advertise.map(str::to_string).unwrap_or_else(|| url.clone());

        let health = HealthConfig {
            probe_interval: Duration::from_millis(20),
            max_probe_interval: Duration::from_millis(40),
            probe_timeout: Duration::from_millis(200),
            max_retries: 2,
        };
        let catchup = CatchupConfig {
            interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(200),
        };

        let local = Arc::new(LocalNode::new(id, advertised, role));
        let connector = HttpConnector::new(Duration::from_secs(1), health.probe_timeout)?;
        let client = connector.client().clone();
        let topology = Topology::new(local, Arc::new(connector), health, catchup);
        let log = ReplicatedLog::new(
            Arc::clone(&topology),
            QuorumCoordinator::new(QuorumConfig {
                timeout: Some(Duration::from_secs(2)),
            }),
        );
        let server = HttpServer::new(log, client);

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move { server.serve(listener, token).await });

        Ok(Self {
            url,
            topology,
            shutdown,
        })
    }

    fn stop(&self) {
        self.topology.shutdown();
        self.shutdown.cancel();
    }

    async fn entries(&self) -> Result<Vec<LogEntry>> {
        let logs: LogsResponse = reqwest::get(format!("{}/logs", self.url))
            .await?
            .json()
            .await?;
        Ok(logs.entries)
    }
}

async fn append(node: &TestNode, msg: &str, w: usize) -> Result<reqwest::Response> {
    Ok(reqwest::Client::new()
        .post(format!("{}/log", node.url))
        .json(&json!({"msg": msg, "w": w}))
        .send()
        .await?)
}

/// Poll `check` until it holds or five seconds pass
async fn eventually<F, Fut>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await? {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("timed out waiting for {}", what)
}

#[tokio::test]
async fn test_write_concern_replicates_to_secondaries() -> Result<()> {
    let master = TestNode::start("m", NodeRole::Master).await?;
    let s1 = TestNode::start("s1", NodeRole::Secondary).await?;
    let s2 = TestNode::start("s2", NodeRole::Secondary).await?;

    for secondary in [&s1, &s2] {
        let registration = master.topology.add_remote_node(&secondary.url).await?;
        assert!(matches!(registration, Registration::Added(_)));
    }

    let response = append(&master, "hello", 3).await?;
    assert!(response.status().is_success());
    let entry: LogEntry = response.json().await?;
    assert_eq!(entry.id, 0);

    for secondary in [&s1, &s2] {
        let entries = secondary.entries().await?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload["msg"], "hello");
        assert_eq!(entries[0].origin_node_id, "m");
    }

    let voted: LogsResponse = reqwest::get(format!("{}/logs?r=3", master.url))
        .await?
        .json()
        .await?;
    assert_eq!(voted.entries.len(), 1);

    let too_many = append(&master, "nope", 4).await?;
    assert_eq!(too_many.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    for node in [&master, &s1, &s2] {
        node.stop();
    }
    Ok(())
}

#[tokio::test]
async fn test_secondary_registers_and_forwards_writes() -> Result<()> {
    let master = TestNode::start("m", NodeRole::Master).await?;
    let s1 = TestNode::start("s1", NodeRole::Secondary).await?;

    s1.topology.add_remote_node(&master.url).await?;
    assert_eq!(s1.topology.master_id().await.as_deref(), Some("m"));
    assert!(master.topology.contains("s1").await);

    let response = append(&s1, "via secondary", 2).await?;
    assert!(response.status().is_success());
    let entry: LogEntry = response.json().await?;
    assert_eq!(entry.origin_node_id, "m");

    let local = s1.entries().await?;
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].id, entry.id);

    master.stop();
    s1.stop();
    Ok(())
}

#[tokio::test]
async fn test_catch_up_delivers_missed_entries() -> Result<()> {
    let master = TestNode::start("m", NodeRole::Master).await?;
    for i in 0..5 {
        assert!(append(&master, &format!("m{}", i), 1).await?.status().is_success());
    }

    let s1 = TestNode::start("s1", NodeRole::Secondary).await?;
    master.topology.add_remote_node(&s1.url).await?;

    eventually("secondary to catch up", || async {
        Ok::<bool, anyhow::Error>(s1.entries().await?.len() == 5)
    })
    .await?;

    let ids: Vec<u64> = s1.entries().await?.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);

    let info: InfoResponse = reqwest::get(format!("{}/info", s1.url)).await?.json().await?;
    assert_eq!(info.version, 5);

    master.stop();
    s1.stop();
    Ok(())
}

#[tokio::test]
async fn test_stopped_peer_is_evicted() -> Result<()> {
    let master = TestNode::start("m", NodeRole::Master).await?;
    let s1 = TestNode::start("s1", NodeRole::Secondary).await?;
    master.topology.add_remote_node(&s1.url).await?;
    assert!(master.topology.contains("s1").await);

    s1.stop();

    eventually("peer eviction", || async {
        Ok::<bool, anyhow::Error>(!master.topology.contains("s1").await)
    })
    .await?;

    // With the peer gone only w=1 can succeed
    let response = append(&master, "alone", 2).await?;
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert!(append(&master, "alone", 1).await?.status().is_success());

    master.stop();
    Ok(())
}

#[tokio::test]
async fn test_peer_is_addressed_by_dialed_url() -> Result<()> {
    let master = TestNode::start("m", NodeRole::Master).await?;
    // Bound to 0.0.0.0 without an advertise URL, a remote secondary reports loopback
    let s1 = TestNode::start_advertising("s1", NodeRole::Secondary, Some(&master.url)).await?;

    master.topology.add_remote_node(&s1.url).await?;
    let peers = master.topology.peer_states().await;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].url, s1.url);

    let response = append(&master, "reaches s1", 2).await?;
    assert!(response.status().is_success());
    assert_eq!(s1.entries().await?.len(), 1);

    master.stop();
    s1.stop();
    Ok(())
}

#[tokio::test]
async fn test_remote_append_of_held_entry_acks() -> Result<()> {
    let s1 = TestNode::start("s1", NodeRole::Secondary).await?;
    let connector = HttpConnector::new(Duration::from_secs(1), Duration::from_millis(200))?;
    let peer = connector.connect(NodeInfo::new("s1", s1.url.clone(), NodeRole::Secondary));

    let entry = LogEntry::new(0, LogEntry::message_payload("once"), "m");
    assert_eq!(peer.append(entry.clone()).await, Some(entry.clone()));
    assert_eq!(peer.append(entry.clone().with_write_concern(2)).await, Some(entry));

    let conflicting = LogEntry::new(0, LogEntry::message_payload("other"), "m");
    assert!(peer.append(conflicting).await.is_none());
    assert_eq!(s1.entries().await?.len(), 1);

    s1.stop();
    Ok(())
}
