//! Remote transport client for cluster mode
//!
//! Connects through one or more seed addresses. With sniffing enabled the
//! client replaces its node list with the HTTP publish addresses reported by
//! the cluster, and a background sampler refreshes that list on an interval.
//! Requests round-robin over the known nodes and fail over to the next node
//! when one cannot be reached.

use super::{node_url, IndexResponse, SearchClient};
use crate::address::ClusterAddress;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::resource::Release;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Settings of the transport client
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    /// Nodes reporting another cluster name are refused
    pub cluster_name: String,
    pub sniff: bool,
    pub nodes_sampler_interval: Duration,
    pub ping_timeout: Duration,
}

impl TransportSettings {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            cluster_name: config.cluster_name.clone(),
            sniff: config.sniff,
            nodes_sampler_interval: config.sampler_interval(),
            ping_timeout: config.ping_timeout(),
        }
    }
}

/// Transport client talking to a remote cluster
pub struct TransportClient {
    settings: TransportSettings,
    http: Client,
    seeds: Vec<String>,
    nodes: Arc<RwLock<Vec<String>>>,
    next_node: AtomicUsize,
    closed: Arc<AtomicBool>,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl TransportClient {
    /// Create a client with no transport addresses yet
    pub fn new(settings: TransportSettings) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(settings.ping_timeout)
            .build()?;

        Ok(Self {
            settings,
            http,
            seeds: Vec::new(),
            nodes: Arc::new(RwLock::new(Vec::new())),
            next_node: AtomicUsize::new(0),
            closed: Arc::new(AtomicBool::new(false)),
            sampler: Mutex::new(None),
        })
    }

    /// Add a seed transport address
    pub fn add_transport_address(mut self, address: &ClusterAddress) -> Self {
        let url = address.base_url();
        if !self.seeds.contains(&url) {
            self.seeds.push(url);
        }
        self
    }

    /// Verify a seed belongs to the configured cluster, sniff the node list
    /// and start the sampler.
    pub async fn connect(self) -> Result<Arc<Self>> {
        if self.seeds.is_empty() {
            return Err(Error::Config("transport client has no seed address".into()));
        }

        let mut last_error = None;
        let mut connected = None;
        for seed in &self.seeds {
            match ping_node(&self.http, seed, &self.settings).await {
                Ok(()) => {
                    connected = Some(seed.clone());
                    break;
                }
                Err(e @ Error::ClusterNameMismatch { .. }) => return Err(e),
                Err(e) => {
                    warn!(seed = %seed, error = %e, "Seed node did not answer");
                    last_error = Some(e);
                }
            }
        }
        let Some(seed) = connected else {
            return Err(last_error
                .unwrap_or_else(|| Error::NoNodeAvailable(self.seeds.join(", "))));
        };

        *self.nodes.write() = self.seeds.clone();
        if self.settings.sniff {
            match sniff_nodes(&self.http, &seed, &self.settings).await {
                Ok(found) if !found.is_empty() => *self.nodes.write() = found,
                Ok(_) => debug!(seed = %seed, "Sniffing found no HTTP nodes, keeping seeds"),
                Err(e) => warn!(seed = %seed, error = %e, "Initial sniff failed, keeping seeds"),
            }
        }

        info!(
            cluster = %self.settings.cluster_name,
            nodes = self.nodes.read().len(),
            sniff = self.settings.sniff,
            "Transport client connected"
        );

        let client = Arc::new(self);
        if client.settings.sniff {
            client.start_sampler();
        }
        Ok(client)
    }

    /// Currently known node base URLs
    pub fn connected_nodes(&self) -> Vec<String> {
        self.nodes.read().clone()
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the sampler. Later calls fail with [`Error::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.sampler.lock().take() {
            handle.abort();
        }
        info!(cluster = %self.settings.cluster_name, "Transport client closed");
    }

    fn start_sampler(&self) {
        let http = self.http.clone();
        let seeds = self.seeds.clone();
        let nodes = self.nodes.clone();
        let closed = self.closed.clone();
        let settings = self.settings.clone();

        let handle = tokio::spawn(async move {
            let period = settings.nodes_sampler_interval.max(Duration::from_secs(1));
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // Skip immediate tick

            while !closed.load(Ordering::SeqCst) {
                interval.tick().await;

                if closed.load(Ordering::SeqCst) {
                    break;
                }

                let mut refreshed = false;
                for seed in &seeds {
                    match sniff_nodes(&http, seed, &settings).await {
                        Ok(found) if !found.is_empty() => {
                            debug!(seed = %seed, nodes = found.len(), "Sampled cluster nodes");
                            *nodes.write() = found;
                            refreshed = true;
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => debug!(seed = %seed, error = %e, "Node sampling failed"),
                    }
                }
                if !refreshed {
                    warn!("Node sampling reached no seed, keeping previous node list");
                }
            }

            debug!("Node sampler stopped");
        });

        *self.sampler.lock() = Some(handle);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Send a request to the next node, failing over on connection errors
    async fn execute<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client, &str) -> Result<RequestBuilder>,
    {
        self.ensure_open()?;

        let nodes = self.nodes.read().clone();
        if nodes.is_empty() {
            return Err(Error::NoNodeAvailable("no known nodes".into()));
        }

        let start = self.next_node.fetch_add(1, Ordering::Relaxed);
        for offset in 0..nodes.len() {
            let node = &nodes[(start + offset) % nodes.len()];
            match build(&self.http, node)?.send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() || e.is_timeout() => {
                    debug!(node = %node, error = %e, "Node unreachable, trying next");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::NoNodeAvailable(nodes.join(", ")))
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        if let Some(handle) = self.sampler.lock().take() {
            handle.abort();
        }
    }
}

impl Release for TransportClient {
    fn release(&self) -> Result<()> {
        self.close();
        Ok(())
    }

    fn resource_name(&self) -> &'static str {
        "transport_client"
    }
}

/// Turn a non-success response into an error
async fn backend_error(index: &str, response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Error::IndexNotFound(index.to_string()),
        StatusCode::BAD_REQUEST if body.contains("IndexAlreadyExists") || body.contains("already exists") => {
            Error::IndexAlreadyExists(index.to_string())
        }
        _ => Error::Backend {
            status: status.as_u16(),
            reason: body,
        },
    }
}

async fn ping_node(http: &Client, base: &str, settings: &TransportSettings) -> Result<()> {
    let response = http
        .get(node_url(base, &[""])?)
        .timeout(settings.ping_timeout)
        .send()
        .await
        .map_err(|e| Error::Connection(format!("Failed to reach {}: {}", base, e)))?;

    if !response.status().is_success() {
        return Err(backend_error("", response).await);
    }

    let info: Value = response.json().await?;
    match info.get("cluster_name").and_then(Value::as_str) {
        Some(name) if name != settings.cluster_name => Err(Error::ClusterNameMismatch {
            expected: settings.cluster_name.clone(),
            actual: name.to_string(),
        }),
        _ => Ok(()),
    }
}

async fn sniff_nodes(http: &Client, base: &str, settings: &TransportSettings) -> Result<Vec<String>> {
    let response = http
        .get(node_url(base, &["_nodes", "http"])?)
        .timeout(settings.ping_timeout)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(backend_error("", response).await);
    }

    let body: Value = response.json().await?;
    if let Some(name) = body.get("cluster_name").and_then(Value::as_str) {
        if name != settings.cluster_name {
            return Err(Error::ClusterNameMismatch {
                expected: settings.cluster_name.clone(),
                actual: name.to_string(),
            });
        }
    }

    let mut found: Vec<String> = body
        .get("nodes")
        .and_then(Value::as_object)
        .map(|nodes| {
            nodes
                .values()
                .filter_map(|node| node.pointer("/http/publish_address")?.as_str())
                .filter_map(parse_publish_address)
                .map(|addr| format!("http://{}", addr))
                .collect()
        })
        .unwrap_or_default();
    found.sort();
    found.dedup();
    Ok(found)
}

/// Accepts `host:port`, `host/ip:port` and `inet[/ip:port]`
fn parse_publish_address(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_start_matches("inet[")
        .trim_end_matches(']');
    let address = trimmed.rsplit('/').next()?.trim();
    let (host, port) = address.rsplit_once(':')?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return None;
    }
    Some(address.to_string())
}

#[async_trait]
impl SearchClient for TransportClient {
    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        let nodes = self.nodes.read().clone();
        for node in &nodes {
            if ping_node(&self.http, node, &self.settings).await.is_ok() {
                return Ok(());
            }
        }
        Err(Error::NoNodeAvailable(nodes.join(", ")))
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self
            .execute(|http, node| Ok(http.head(node_url(node, &[index])?)))
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(backend_error(index, response).await),
        }
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let response = self
            .execute(|http, node| Ok(http.delete(node_url(node, &[index])?)))
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(backend_error(index, response).await)
        }
    }

    async fn create_index(&self, index: &str, settings: &Value) -> Result<()> {
        let body = json!({ "settings": settings });
        let response = self
            .execute(|http, node| Ok(http.put(node_url(node, &[index])?).json(&body)))
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(backend_error(index, response).await)
        }
    }

    async fn index_settings(&self, index: &str) -> Result<Option<Value>> {
        let response = self
            .execute(|http, node| Ok(http.get(node_url(node, &[index, "_settings"])?)))
            .await?;
        match response.status() {
            s if s.is_success() => {
                let body: Value = response.json().await?;
                Ok(body.get(index).and_then(|i| i.get("settings")).cloned())
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(backend_error(index, response).await),
        }
    }

    async fn index_document(
        &self,
        index: &str,
        doc_type: &str,
        id: Option<&str>,
        source: &Value,
    ) -> Result<IndexResponse> {
        let response = self
            .execute(|http, node| {
                Ok(match id {
                    Some(id) => http.put(node_url(node, &[index, doc_type, id])?),
                    None => http.post(node_url(node, &[index, doc_type, ""])?),
                }
                .json(source))
            })
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(index, response).await);
        }
        Ok(response.json().await?)
    }

    async fn get_document(&self, index: &str, doc_type: &str, id: &str) -> Result<Option<Value>> {
        let response = self
            .execute(|http, node| Ok(http.get(node_url(node, &[index, doc_type, id])?)))
            .await?;
        match response.status() {
            s if s.is_success() => {
                let body: Value = response.json().await?;
                Ok(body.get("_source").cloned())
            }
            StatusCode::NOT_FOUND => {
                let body: Value = response.json().await.unwrap_or(Value::Null);
                if body.get("error").is_some() {
                    Err(Error::IndexNotFound(index.to_string()))
                } else {
                    Ok(None)
                }
            }
            _ => Err(backend_error(index, response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_publish_address() {
        assert_eq!(
            parse_publish_address("127.0.0.1:9200").as_deref(),
            Some("127.0.0.1:9200")
        );
        assert_eq!(
            parse_publish_address("inet[/10.0.0.4:9201]").as_deref(),
            Some("10.0.0.4:9201")
        );
        assert_eq!(
            parse_publish_address("es-2/10.0.0.5:9200").as_deref(),
            Some("10.0.0.5:9200")
        );
        assert_eq!(parse_publish_address("garbage"), None);
        assert_eq!(parse_publish_address("host:notaport"), None);
    }

    #[test]
    fn test_node_url_encodes_segments() {
        let url = node_url("http://127.0.0.1:9200", &["_percolator", "blogger", "a b"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9200/_percolator/blogger/a%20b");

        let url = node_url("http://127.0.0.1:9200", &["_percolator", "blogger", ""]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9200/_percolator/blogger/");
    }

    #[test]
    fn test_settings_from_config() {
        let settings = TransportSettings::from_config(&ConnectionConfig::default());
        assert_eq!(settings.cluster_name, "BloggerCluster");
        assert!(settings.sniff);
        assert_eq!(settings.nodes_sampler_interval, Duration::from_secs(60));
        assert_eq!(settings.ping_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_connect_without_seed_fails() {
        let client = TransportClient::new(TransportSettings::from_config(
            &ConnectionConfig::default(),
        ))
        .unwrap();
        assert!(matches!(client.connect().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_no_known_nodes() {
        let client = TransportClient::new(TransportSettings::from_config(
            &ConnectionConfig::default(),
        ))
        .unwrap();
        assert!(matches!(
            client.index_exists("blogger").await,
            Err(Error::NoNodeAvailable(_))
        ));
    }
}
