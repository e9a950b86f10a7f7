use super::QueryRegistrar;
use crate::error::{Error, Result};
use crate::resource::Release;
use crate::transport::{node_url, PERCOLATOR_INDEX};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const JSON_UTF8: &str = "application/json;charset=UTF-8";

/// Pooled HTTP client used only by the HTTP registration path.
///
/// Releasing drops the pool; later requests fail with [`Error::Closed`].
pub struct HttpPool {
    client: RwLock<Option<Client>>,
    base_url: String,
}

impl HttpPool {
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            client: RwLock::new(Some(client)),
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_closed(&self) -> bool {
        self.client.read().is_none()
    }

    /// Handle on the pool
    pub fn client(&self) -> Result<Client> {
        self.client.read().clone().ok_or(Error::Closed)
    }
}

impl Release for HttpPool {
    fn release(&self) -> Result<()> {
        if self.client.write().take().is_some() {
            debug!(base_url = %self.base_url, "HTTP connection pool shut down");
        }
        Ok(())
    }

    fn resource_name(&self) -> &'static str {
        "http_pool"
    }
}

/// Writes stored queries through the HTTP/JSON API.
///
/// Without an id the query is created with `POST /_percolator/{index}/`,
/// with one it is upserted with `PUT /_percolator/{index}/{id}`.
pub struct HttpRegistrar {
    pool: Arc<HttpPool>,
}

impl HttpRegistrar {
    pub fn new(pool: Arc<HttpPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryRegistrar for HttpRegistrar {
    async fn register(&self, index: &str, query: &Value, id: Option<&str>) -> Result<String> {
        let client = self.pool.client()?;
        let base = self.pool.base_url();
        let body = serde_json::to_vec(query)?;

        let request = match id {
            Some(id) => client.put(node_url(base, &[PERCOLATOR_INDEX, index, id])?),
            None => client.post(node_url(base, &[PERCOLATOR_INDEX, index, ""])?),
        };
        let response = request
            .header(CONTENT_TYPE, JSON_UTF8)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(Error::Backend {
                status: status.as_u16(),
                reason,
            });
        }

        // An absent or unparsable body keeps the id we sent
        let text = response.text().await.unwrap_or_default();
        let assigned = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| body.get("_id").and_then(Value::as_str).map(str::to_string));

        assigned
            .or_else(|| id.map(str::to_string))
            .ok_or(Error::MissingId)
    }

    fn protocol(&self) -> &'static str {
        "http"
    }
}
