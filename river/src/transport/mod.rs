//! Native client API and its two transports
//!
//! - **Remote**: [`TransportClient`] talks to a cluster over the network,
//!   sniffing the other nodes from its seed address
//! - **Embedded**: [`EmbeddedNode`] runs the backend in-process and hands
//!   out clients bound to it

mod embedded;
mod remote;

pub use embedded::{EmbeddedNode, LocalClient, NodeStats};
pub use remote::{TransportClient, TransportSettings};

use crate::error::{Error, Result};
use crate::resource::Release;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Reserved index holding stored queries; the document type is the owning index
pub const PERCOLATOR_INDEX: &str = "_percolator";

/// Acknowledgement of a document write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexResponse {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type")]
    pub doc_type: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_version", default = "default_version")]
    pub version: u64,
    #[serde(default)]
    pub created: bool,
}

fn default_version() -> u64 {
    1
}

/// Request/acknowledge API of the backend.
///
/// Every call blocks the caller until the backend acknowledges it.
#[async_trait]
pub trait SearchClient: Release {
    /// Check the backend is reachable
    async fn ping(&self) -> Result<()>;

    async fn index_exists(&self, index: &str) -> Result<bool>;

    async fn delete_index(&self, index: &str) -> Result<()>;

    /// Create an index with the given index-level settings document
    async fn create_index(&self, index: &str, settings: &Value) -> Result<()>;

    /// Settings the index was created with, `None` if it does not exist
    async fn index_settings(&self, index: &str) -> Result<Option<Value>>;

    /// Write a document. Without an id the backend assigns one.
    async fn index_document(
        &self,
        index: &str,
        doc_type: &str,
        id: Option<&str>,
        source: &Value,
    ) -> Result<IndexResponse>;

    async fn get_document(&self, index: &str, doc_type: &str, id: &str) -> Result<Option<Value>>;
}

/// Shared handle to the active client
pub type ClientHandle = Arc<dyn SearchClient>;

/// Build `{base}/{segments...}` with each segment percent-encoded. An empty
/// last segment leaves a trailing slash.
pub(crate) fn node_url(base: &str, segments: &[&str]) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| Error::Config(format!("Invalid node URL '{}': {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| Error::Config(format!("Node URL '{}' cannot be a base", base)))?
        .clear()
        .extend(segments);
    Ok(url)
}
