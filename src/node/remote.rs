//! Remote Node Proxy
//!
//! HTTP client for a peer node. Transport failures, timeouts and non-success
//! statuses all collapse into `None`; nothing here returns an error to the
//! replication path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::{Connector, Node, NodeInfo};
use crate::log::{EntryId, LogEntry};
use crate::replication::protocol::{InfoResponse, LogsResponse, RegisterRequest};

/// Proxy for a peer reached over HTTP
pub struct RemoteNodeProxy {
    info: NodeInfo,
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl RemoteNodeProxy {
    /// Create a proxy sharing an HTTP client
    pub fn new(info: NodeInfo, client: reqwest::Client, probe_timeout: Duration) -> Self {
        Self {
            info,
            client,
            probe_timeout,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        endpoint(&self.info.url, path)
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        let url = self.endpoint(path);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("GET {} failed: {}", url, e);
                return None;
            }
        };
        decode(&url, response).await
    }
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

async fn decode<T: DeserializeOwned>(url: &str, response: reqwest::Response) -> Option<T> {
    let status = response.status();
    if !status.is_success() {
        tracing::debug!("{} answered {}", url, status);
        return None;
    }
    match response.json::<T>().await {
        Ok(body) => Some(body),
        Err(e) => {
            tracing::debug!("Undecodable response from {}: {}", url, e);
            None
        }
    }
}

#[async_trait]
impl Node for RemoteNodeProxy {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    async fn healthy(&self) -> bool {
        let url = self.endpoint("/healthcheck");
        match self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                tracing::trace!("Health probe {} failed: {}", url, e);
                false
            }
        }
    }

    async fn version(&self) -> Option<u64> {
        self.fetch::<InfoResponse>("/info").await.map(|i| i.version)
    }

    async fn get(&self, id: EntryId) -> Option<LogEntry> {
        self.fetch(&format!("/log/{}", id)).await
    }

    async fn get_all(&self) -> Option<Vec<LogEntry>> {
        self.fetch::<LogsResponse>("/logs").await.map(|r| r.entries)
    }

    async fn append(&self, entry: LogEntry) -> Option<LogEntry> {
        let url = self.endpoint(&format!("/log/{}", entry.id));
        let response = match self.client.post(&url).json(&entry).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("POST {} failed: {}", url, e);
                return None;
            }
        };
        if response.status() != reqwest::StatusCode::CONFLICT {
            return decode(&url, response).await;
        }

        // The peer already holds this id; an identical copy counts as an ack
        let held: LogEntry = self.fetch(&format!("/log/{}", entry.id)).await?;
        if held != entry {
            tracing::warn!(
                "Peer {} holds a different entry {}",
                self.info.node_id,
                entry.id
            );
            return None;
        }
        Some(held)
    }
}

/// Discovers peers over HTTP and hands out [`RemoteNodeProxy`] handles
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl HttpConnector {
    /// Create a connector
    ///
    /// `request_timeout` bounds every peer call; `probe_timeout` bounds
    /// health probes.
    pub fn new(request_timeout: Duration, probe_timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| crate::Error::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            probe_timeout,
        })
    }

    /// Shared HTTP client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn handshake(&self, url: &str) -> Option<NodeInfo> {
        let info_url = endpoint(url, "/info");
        let response = match self.client.get(&info_url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Handshake with {} failed: {}", url, e);
                return None;
            }
        };
        decode::<InfoResponse>(&info_url, response)
            .await
            .map(|info| info.node_info(url))
    }

    fn connect(&self, info: NodeInfo) -> Arc<dyn Node> {
        Arc::new(RemoteNodeProxy::new(
            info,
            self.client.clone(),
            self.probe_timeout,
        ))
    }

    async fn introduce(&self, master_url: &str, local: &NodeInfo) -> bool {
        let url = endpoint(master_url, "/register");
        match self
            .client
            .post(&url)
            .json(&RegisterRequest::from_info(local))
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => true,
            Ok(r) => {
                tracing::warn!("Registration with {} refused: {}", master_url, r.status());
                false
            }
            Err(e) => {
                tracing::warn!("Registration with {} failed: {}", master_url, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRole;

    #[test]
    fn test_endpoint_joins_paths() {
        assert_eq!(endpoint("http://a:1/", "/info"), "http://a:1/info");
        assert_eq!(endpoint("http://a:1", "/log/3"), "http://a:1/log/3");
    }

    #[tokio::test]
    async fn test_unreachable_peer_yields_absence() {
        // Nothing listens on port 9 of the loopback address
        let connector =
            HttpConnector::new(Duration::from_millis(300), Duration::from_millis(100)).unwrap();
        let info = NodeInfo::new("ghost", "http://127.0.0.1:9", NodeRole::Secondary);
        let peer = connector.connect(info);

        assert!(!peer.healthy().await);
        assert!(peer.version().await.is_none());
        assert!(peer.get_all().await.is_none());
        assert!(peer
            .append(LogEntry::new(0, LogEntry::message_payload("x"), "m"))
            .await
            .is_none());
        assert!(connector.handshake("http://127.0.0.1:9").await.is_none());
    }
}
