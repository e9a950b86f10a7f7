//! In-process backend node for standalone mode
//!
//! Holds indices, their creation settings and typed documents in memory.
//! Stored queries live in the reserved [`PERCOLATOR_INDEX`] under a type
//! named after the owning index and disappear when that index is deleted.
//! The node can optionally serve its REST API on a local listener so the
//! HTTP registration path and remote clients can reach it.

use super::{IndexResponse, SearchClient, PERCOLATOR_INDEX};
use crate::error::{Error, Result};
use crate::resource::Release;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, head, post};
use axum::{Json, Router};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct IndexData {
    settings: Value,
    types: HashMap<String, HashMap<String, StoredDocument>>,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    source: Value,
    version: u64,
}

/// Counters since the node started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub indices_created: u64,
    pub indices_deleted: u64,
    pub documents_indexed: u64,
}

struct HttpListener {
    address: SocketAddr,
    task: JoinHandle<()>,
}

/// Embedded backend node
pub struct EmbeddedNode {
    node_id: String,
    cluster_name: String,
    indices: RwLock<HashMap<String, IndexData>>,
    closed: AtomicBool,
    indices_created: AtomicU64,
    indices_deleted: AtomicU64,
    documents_indexed: AtomicU64,
    http: Mutex<Option<HttpListener>>,
}

impl EmbeddedNode {
    /// Start a node without a REST listener
    pub fn start(cluster_name: &str) -> Arc<Self> {
        let node = Arc::new(Self {
            node_id: format!("embedded-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            cluster_name: cluster_name.to_string(),
            indices: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            indices_created: AtomicU64::new(0),
            indices_deleted: AtomicU64::new(0),
            documents_indexed: AtomicU64::new(0),
            http: Mutex::new(None),
        });
        info!(node_id = %node.node_id, cluster = %node.cluster_name, "Embedded node started");
        node
    }

    /// Start a node that also serves its REST API on `bind`
    pub async fn start_with_http(cluster_name: &str, bind: SocketAddr) -> Result<Arc<Self>> {
        let node = Self::start(cluster_name);
        let listener = tokio::net::TcpListener::bind(bind).await?;
        let address = listener.local_addr()?;
        let router = rest_router(node.clone());

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                warn!(error = %e, "Embedded node HTTP listener stopped");
            }
        });

        info!(node_id = %node.node_id, address = %address, "Embedded node serving HTTP");
        *node.http.lock() = Some(HttpListener { address, task });
        Ok(node)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Bound REST listener address, if the node serves HTTP
    pub fn http_address(&self) -> Option<SocketAddr> {
        self.http.lock().as_ref().map(|l| l.address)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Client bound to this node
    pub fn client(self: &Arc<Self>) -> LocalClient {
        LocalClient { node: self.clone() }
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            indices_created: self.indices_created.load(Ordering::Relaxed),
            indices_deleted: self.indices_deleted.load(Ordering::Relaxed),
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
        }
    }

    /// Stop the node. Later calls against it fail with [`Error::NodeClosed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(listener) = self.http.lock().take() {
            listener.task.abort();
        }
        self.indices.write().clear();
        info!(node_id = %self.node_id, "Embedded node closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::NodeClosed)
        } else {
            Ok(())
        }
    }

    fn index_exists(&self, index: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.indices.read().contains_key(index))
    }

    fn create_index(&self, index: &str, settings: &Value) -> Result<()> {
        self.ensure_open()?;
        validate_index_name(index)?;

        let mut indices = self.indices.write();
        if indices.contains_key(index) {
            return Err(Error::IndexAlreadyExists(index.to_string()));
        }
        indices.insert(
            index.to_string(),
            IndexData {
                settings: settings.clone(),
                types: HashMap::new(),
            },
        );
        self.indices_created.fetch_add(1, Ordering::Relaxed);
        debug!(index, "Created index");
        Ok(())
    }

    fn delete_index(&self, index: &str) -> Result<()> {
        self.ensure_open()?;

        let mut indices = self.indices.write();
        if indices.remove(index).is_none() {
            return Err(Error::IndexNotFound(index.to_string()));
        }
        // Stored queries belong to the index they were registered against
        if let Some(percolator) = indices.get_mut(PERCOLATOR_INDEX) {
            percolator.types.remove(index);
        }
        self.indices_deleted.fetch_add(1, Ordering::Relaxed);
        debug!(index, "Deleted index");
        Ok(())
    }

    fn index_settings(&self, index: &str) -> Result<Option<Value>> {
        self.ensure_open()?;
        Ok(self.indices.read().get(index).map(|data| data.settings.clone()))
    }

    fn index_document(
        &self,
        index: &str,
        doc_type: &str,
        id: Option<&str>,
        source: &Value,
    ) -> Result<IndexResponse> {
        self.ensure_open()?;
        if !source.is_object() {
            return Err(Error::Backend {
                status: 400,
                reason: "document source must be a JSON object".to_string(),
            });
        }

        let mut indices = self.indices.write();
        if index == PERCOLATOR_INDEX && !indices.contains_key(doc_type) {
            return Err(Error::IndexNotFound(doc_type.to_string()));
        }
        if !indices.contains_key(index) {
            validate_index_name(index)?;
            indices.insert(
                index.to_string(),
                IndexData {
                    settings: json!({}),
                    types: HashMap::new(),
                },
            );
            self.indices_created.fetch_add(1, Ordering::Relaxed);
            debug!(index, "Auto-created index on write");
        }
        let data = indices
            .get_mut(index)
            .ok_or_else(|| Error::IndexNotFound(index.to_string()))?;

        let id = match id {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        let docs = data.types.entry(doc_type.to_string()).or_default();
        let (version, created) = match docs.get(&id) {
            Some(existing) => (existing.version + 1, false),
            None => (1, true),
        };
        docs.insert(
            id.clone(),
            StoredDocument {
                source: source.clone(),
                version,
            },
        );
        self.documents_indexed.fetch_add(1, Ordering::Relaxed);

        Ok(IndexResponse {
            index: index.to_string(),
            doc_type: doc_type.to_string(),
            id,
            version,
            created,
        })
    }

    fn get_document(&self, index: &str, doc_type: &str, id: &str) -> Result<Option<Value>> {
        Ok(self.get_stored(index, doc_type, id)?.map(|doc| doc.source))
    }

    fn get_stored(&self, index: &str, doc_type: &str, id: &str) -> Result<Option<StoredDocument>> {
        self.ensure_open()?;
        let indices = self.indices.read();
        let data = indices
            .get(index)
            .ok_or_else(|| Error::IndexNotFound(index.to_string()))?;
        Ok(data
            .types
            .get(doc_type)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    /// Number of stored queries registered against `index`
    pub fn stored_query_count(&self, index: &str) -> usize {
        self.indices
            .read()
            .get(PERCOLATOR_INDEX)
            .and_then(|p| p.types.get(index))
            .map_or(0, |docs| docs.len())
    }
}

fn validate_index_name(index: &str) -> Result<()> {
    let reserved = index == PERCOLATOR_INDEX;
    let invalid = index.is_empty()
        || (index.starts_with('_') && !reserved)
        || index.chars().any(|c| c.is_uppercase() || matches!(c, ' ' | '/' | '\\' | '*' | '?' | '"' | '<' | '>' | '|' | ','));
    if invalid {
        return Err(Error::Backend {
            status: 400,
            reason: format!("invalid index name [{}]", index),
        });
    }
    Ok(())
}

impl Release for EmbeddedNode {
    fn release(&self) -> Result<()> {
        self.close();
        Ok(())
    }

    fn resource_name(&self) -> &'static str {
        "embedded_node"
    }
}

/// Client bound to an [`EmbeddedNode`]
#[derive(Clone)]
pub struct LocalClient {
    node: Arc<EmbeddedNode>,
}

impl LocalClient {
    pub fn node(&self) -> &Arc<EmbeddedNode> {
        &self.node
    }
}

impl Release for LocalClient {
    // The node, not the client, owns the data
    fn release(&self) -> Result<()> {
        Ok(())
    }

    fn resource_name(&self) -> &'static str {
        "local_client"
    }
}

#[async_trait]
impl SearchClient for LocalClient {
    async fn ping(&self) -> Result<()> {
        self.node.ensure_open()
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        self.node.index_exists(index)
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        self.node.delete_index(index)
    }

    async fn create_index(&self, index: &str, settings: &Value) -> Result<()> {
        self.node.create_index(index, settings)
    }

    async fn index_settings(&self, index: &str) -> Result<Option<Value>> {
        self.node.index_settings(index)
    }

    async fn index_document(
        &self,
        index: &str,
        doc_type: &str,
        id: Option<&str>,
        source: &Value,
    ) -> Result<IndexResponse> {
        self.node.index_document(index, doc_type, id, source)
    }

    async fn get_document(&self, index: &str, doc_type: &str, id: &str) -> Result<Option<Value>> {
        self.node.get_document(index, doc_type, id)
    }
}

// ========================================
// REST surface
// ========================================

struct RestError(Error);

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::IndexNotFound(_) => StatusCode::NOT_FOUND,
            Error::IndexAlreadyExists(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::NodeClosed => StatusCode::SERVICE_UNAVAILABLE,
            Error::Backend { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": self.0.to_string(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<Error> for RestError {
    fn from(err: Error) -> Self {
        RestError(err)
    }
}

type RestResult<T> = std::result::Result<T, RestError>;

fn rest_router(node: Arc<EmbeddedNode>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/_nodes/http", get(nodes_http_handler))
        .route(
            "/:index",
            head(exists_handler).put(create_handler).delete(delete_handler),
        )
        .route("/:index/_settings", get(settings_handler))
        .route("/:index/:doc_type", post(create_document_handler))
        .route("/:index/:doc_type/", post(create_document_handler))
        .route(
            "/:index/:doc_type/:id",
            get(get_document_handler)
                .put(put_document_handler)
                .post(put_document_handler),
        )
        .with_state(node)
}

async fn root_handler(State(node): State<Arc<EmbeddedNode>>) -> RestResult<Json<Value>> {
    node.ensure_open()?;
    Ok(Json(json!({
        "ok": true,
        "status": 200,
        "name": node.node_id,
        "cluster_name": node.cluster_name,
    })))
}

async fn nodes_http_handler(State(node): State<Arc<EmbeddedNode>>) -> RestResult<Json<Value>> {
    node.ensure_open()?;
    let mut nodes = serde_json::Map::new();
    if let Some(address) = node.http_address() {
        nodes.insert(
            node.node_id.clone(),
            json!({
                "name": node.node_id,
                "http": { "publish_address": address.to_string() },
            }),
        );
    }
    Ok(Json(json!({
        "cluster_name": node.cluster_name,
        "nodes": nodes,
    })))
}

async fn exists_handler(
    State(node): State<Arc<EmbeddedNode>>,
    Path(index): Path<String>,
) -> RestResult<StatusCode> {
    if node.index_exists(&index)? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

async fn create_handler(
    State(node): State<Arc<EmbeddedNode>>,
    Path(index): Path<String>,
    body: Bytes,
) -> RestResult<Json<Value>> {
    let body: Value = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body).map_err(Error::from)?
    };
    let settings = body.get("settings").cloned().unwrap_or(body);
    node.create_index(&index, &settings)?;
    Ok(Json(json!({ "ok": true, "acknowledged": true })))
}

async fn delete_handler(
    State(node): State<Arc<EmbeddedNode>>,
    Path(index): Path<String>,
) -> RestResult<Json<Value>> {
    node.delete_index(&index)?;
    Ok(Json(json!({ "ok": true, "acknowledged": true })))
}

async fn settings_handler(
    State(node): State<Arc<EmbeddedNode>>,
    Path(index): Path<String>,
) -> RestResult<Json<Value>> {
    let settings = node
        .index_settings(&index)?
        .ok_or_else(|| Error::IndexNotFound(index.clone()))?;
    let mut body = serde_json::Map::new();
    body.insert(index, json!({ "settings": settings }));
    Ok(Json(Value::Object(body)))
}

async fn create_document_handler(
    State(node): State<Arc<EmbeddedNode>>,
    Path((index, doc_type)): Path<(String, String)>,
    body: Bytes,
) -> RestResult<(StatusCode, Json<IndexResponse>)> {
    let source: Value = serde_json::from_slice(&body).map_err(Error::from)?;
    let response = node.index_document(&index, &doc_type, None, &source)?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn put_document_handler(
    State(node): State<Arc<EmbeddedNode>>,
    Path((index, doc_type, id)): Path<(String, String, String)>,
    body: Bytes,
) -> RestResult<(StatusCode, Json<IndexResponse>)> {
    let source: Value = serde_json::from_slice(&body).map_err(Error::from)?;
    let response = node.index_document(&index, &doc_type, Some(&id), &source)?;
    let status = if response.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

async fn get_document_handler(
    State(node): State<Arc<EmbeddedNode>>,
    Path((index, doc_type, id)): Path<(String, String, String)>,
) -> RestResult<Response> {
    match node.get_stored(&index, &doc_type, &id)? {
        Some(doc) => Ok(Json(json!({
            "_index": index,
            "_type": doc_type,
            "_id": id,
            "_version": doc.version,
            "exists": true,
            "_source": doc.source,
        }))
        .into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({
                "_index": index,
                "_type": doc_type,
                "_id": id,
                "exists": false,
            })),
        )
            .into_response()),
    }
}
