//! Stored-query registration
//!
//! A stored query is a query document saved in the percolation namespace of
//! an index so incoming documents can later be matched against it. Two
//! [`QueryRegistrar`] variants write it: [`NativeRegistrar`] through the
//! client API and [`HttpRegistrar`] through the HTTP/JSON API. The variant
//! is chosen once per connection and never mixed within a call.

mod http;
mod native;

pub use http::{HttpPool, HttpRegistrar};
pub use native::NativeRegistrar;

use crate::error::{Error, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Field matched by term queries registered without an explicit field
pub const DEFAULT_FIELD: &str = "_all";

/// A term-match query to persist against an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredQuery {
    pub index: String,
    pub field: String,
    pub value: String,
    pub id: Option<String>,
}

impl StoredQuery {
    pub fn term(index: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            field: field.into(),
            value: value.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Query document persisted for this stored query
    pub fn document(&self) -> Value {
        term_query(&self.field, &self.value)
    }
}

/// `{"query": {"term": {field: value}}}`
pub fn term_query(field: &str, value: &str) -> Value {
    let mut term = Map::new();
    term.insert(field.to_string(), Value::String(value.to_string()));
    json!({ "query": { "term": term } })
}

/// One way of writing a query document into an index's percolation namespace
#[async_trait]
pub trait QueryRegistrar: Send + Sync {
    /// Persist `query` and return its identifier. Without `id` the backend
    /// assigns one.
    async fn register(&self, index: &str, query: &Value, id: Option<&str>) -> Result<String>;

    /// Label used in logs and metrics
    fn protocol(&self) -> &'static str;
}

/// Registration operations over the selected [`QueryRegistrar`]
#[derive(Clone)]
pub struct Registrar {
    inner: Arc<dyn QueryRegistrar>,
}

impl Registrar {
    pub fn new(inner: Arc<dyn QueryRegistrar>) -> Self {
        Self { inner }
    }

    pub fn protocol(&self) -> &'static str {
        self.inner.protocol()
    }

    /// Register a pre-built query document
    pub async fn register_query(&self, index: &str, query: &Value, id: Option<&str>) -> Result<String> {
        let protocol = self.inner.protocol();
        match self.inner.register(index, query, id).await {
            Ok(assigned) => {
                debug!(index, protocol, id = %assigned, "Registered stored query");
                metrics::record_registration(protocol, index);
                Ok(assigned)
            }
            Err(e) => {
                warn!(index, protocol, error = %e, "Stored query registration failed");
                metrics::record_registration_error(protocol, index, e.error_type());
                Err(e)
            }
        }
    }

    /// Register `{"query": {"term": {field: value}}}`
    pub async fn register_term_query(
        &self,
        index: &str,
        field: &str,
        value: &str,
        id: Option<&str>,
    ) -> Result<String> {
        self.register_query(index, &term_query(field, value), id).await
    }

    /// Register a term query against [`DEFAULT_FIELD`]
    pub async fn register_all_term(&self, index: &str, value: &str) -> Result<String> {
        self.register_term_query(index, DEFAULT_FIELD, value, None).await
    }

    pub async fn register_stored(&self, query: &StoredQuery) -> Result<String> {
        self.register_query(&query.index, &query.document(), query.id.as_deref())
            .await
    }

    /// Register one term query per value, in order.
    ///
    /// Bulk mode is not supported and fails before any request is made.
    /// Otherwise every value is attempted; a failed value leaves `None` in
    /// its slot.
    pub async fn register_many<S: AsRef<str>>(
        &self,
        index: &str,
        field: &str,
        values: &[S],
        bulk: bool,
    ) -> Result<Vec<Option<String>>> {
        if bulk {
            return Err(Error::Unsupported("bulk stored-query registration"));
        }

        let mut ids = Vec::with_capacity(values.len());
        for value in values {
            ids.push(
                self.register_term_query(index, field, value.as_ref(), None)
                    .await
                    .ok(),
            );
        }
        Ok(ids)
    }
}
