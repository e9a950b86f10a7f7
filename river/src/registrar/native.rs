use super::QueryRegistrar;
use crate::error::Result;
use crate::transport::{ClientHandle, PERCOLATOR_INDEX};
use async_trait::async_trait;
use serde_json::Value;

/// Writes stored queries with an index request on the client
pub struct NativeRegistrar {
    client: ClientHandle,
}

impl NativeRegistrar {
    pub fn new(client: ClientHandle) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueryRegistrar for NativeRegistrar {
    async fn register(&self, index: &str, query: &Value, id: Option<&str>) -> Result<String> {
        let response = self
            .client
            .index_document(PERCOLATOR_INDEX, index, id, query)
            .await?;
        Ok(response.id)
    }

    fn protocol(&self) -> &'static str {
        "native"
    }
}
