//! Index provisioning
//!
//! Makes sure the target index exists in a known state. An existing index
//! can be dropped and rebuilt; its stored queries go with it. Shape
//! (analysis, shards, replicas) is applied only when the index is created
//! and never reconciled against an index that is kept.

use crate::config::IndexConfig;
use crate::error::Result;
use crate::metrics;
use crate::transport::ClientHandle;
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::{debug, error, info};

/// Merge factor set on every index the river creates
pub const MERGE_FACTOR: u32 = 30;

/// Shape of the index to provision
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub recreate_if_exists: bool,
    pub shard_count: u32,
    pub replica_count: u32,
    /// Custom analysis section, the built-in one is used when absent
    pub analysis: Option<Value>,
}

impl IndexSpec {
    /// One shard, one replica, built-in analysis, no recreation
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recreate_if_exists: false,
            shard_count: 1,
            replica_count: 1,
            analysis: None,
        }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            name: config.name.clone(),
            recreate_if_exists: config.recreate,
            shard_count: config.shards,
            replica_count: config.replicas,
            analysis: config.analysis.clone(),
        }
    }

    pub fn recreate(mut self, recreate: bool) -> Self {
        self.recreate_if_exists = recreate;
        self
    }

    pub fn shards(mut self, shards: u32) -> Self {
        self.shard_count = shards;
        self
    }

    pub fn replicas(mut self, replicas: u32) -> Self {
        self.replica_count = replicas;
        self
    }

    pub fn analysis(mut self, analysis: Value) -> Self {
        self.analysis = Some(analysis);
        self
    }

    /// Settings document sent with the create request
    pub fn settings(&self) -> Value {
        let analysis = match &self.analysis {
            // Accept either the bare section or a document wrapping it
            Some(custom) => custom.get("analysis").cloned().unwrap_or_else(|| custom.clone()),
            None => default_analysis(),
        };

        let mut settings = Map::new();
        settings.insert("analysis".into(), analysis);
        settings.insert("index.merge.policy.merge_factor".into(), json!(MERGE_FACTOR));
        settings.insert("index.number_of_shards".into(), json!(self.shard_count));
        settings.insert("index.number_of_replicas".into(), json!(self.replica_count));
        Value::Object(settings)
    }
}

/// Built-in analysis: a `facetAnalyzer` splitting on `|` and whitespace, and
/// the `standard` analyzer (alias `searchall`) with stemming and stopwords.
pub fn default_analysis() -> Value {
    json!({
        "analyzer": {
            "facetAnalyzer": {
                "type": "custom",
                "tokenizer": "facetTokenizer"
            },
            "standard": {
                "alias": ["searchall"],
                "tokenizer": "standard",
                "filter": ["standard", "lowercase", "snowball", "stop"]
            }
        },
        "tokenizer": {
            "facetTokenizer": {
                "type": "pattern",
                "pattern": "[|\\s]"
            }
        }
    })
}

/// What provisioning did to the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Existing,
    Created,
    Recreated,
}

impl ProvisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionOutcome::Existing => "existing",
            ProvisionOutcome::Created => "created",
            ProvisionOutcome::Recreated => "recreated",
        }
    }
}

pub struct IndexProvisioner {
    client: ClientHandle,
}

impl IndexProvisioner {
    pub fn new(client: ClientHandle) -> Self {
        Self { client }
    }

    /// Ensure `index` exists with the default shape. Errors are logged and
    /// reported as `false`.
    pub async fn ensure_index(&self, index: &str, recreate: bool) -> bool {
        self.ensure_index_with(&IndexSpec::new(index).recreate(recreate))
            .await
    }

    /// Ensure the index described by `spec` exists. Errors are logged and
    /// reported as `false`.
    pub async fn ensure_index_with(&self, spec: &IndexSpec) -> bool {
        match self.try_ensure(spec).await {
            Ok(_) => true,
            Err(e) => {
                error!(index = %spec.name, error = %e, "Index provisioning failed");
                metrics::record_provision_error(&spec.name, e.error_type());
                false
            }
        }
    }

    /// Exists check, optional delete, then create
    pub async fn try_ensure(&self, spec: &IndexSpec) -> Result<ProvisionOutcome> {
        let start = Instant::now();
        let index = spec.name.as_str();

        let mut exists = self.client.index_exists(index).await?;
        let mut deleted = false;
        if exists && spec.recreate_if_exists {
            info!(index, "Previous index exists, removing");
            self.client.delete_index(index).await?;
            exists = false;
            deleted = true;
        }

        let outcome = if exists {
            debug!(index, "Index already exists");
            ProvisionOutcome::Existing
        } else {
            self.client.create_index(index, &spec.settings()).await?;
            info!(
                index,
                shards = spec.shard_count,
                replicas = spec.replica_count,
                custom_analysis = spec.analysis.is_some(),
                "Created index"
            );
            if deleted {
                ProvisionOutcome::Recreated
            } else {
                ProvisionOutcome::Created
            }
        };

        metrics::record_provision(index, outcome.as_str(), start.elapsed());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = IndexSpec::new("blogger").settings();
        assert_eq!(settings["index.number_of_shards"], 1);
        assert_eq!(settings["index.number_of_replicas"], 1);
        assert_eq!(settings["index.merge.policy.merge_factor"], 30);
        assert_eq!(
            settings["analysis"]["analyzer"]["standard"]["alias"],
            json!(["searchall"])
        );
        assert_eq!(
            settings["analysis"]["tokenizer"]["facetTokenizer"]["pattern"],
            "[|\\s]"
        );
    }

    #[test]
    fn test_custom_analysis_keeps_shape_settings() {
        let custom = json!({"analyzer": {"plain": {"type": "whitespace"}}});
        let settings = IndexSpec::new("blogger")
            .shards(3)
            .replicas(0)
            .analysis(custom.clone())
            .settings();
        assert_eq!(settings["analysis"], custom);
        assert_eq!(settings["index.number_of_shards"], 3);
        assert_eq!(settings["index.number_of_replicas"], 0);
        assert_eq!(settings["index.merge.policy.merge_factor"], 30);

        let wrapped = IndexSpec::new("blogger")
            .analysis(json!({ "analysis": custom.clone() }))
            .settings();
        assert_eq!(wrapped["analysis"], custom);
    }

    #[test]
    fn test_spec_from_config() {
        let spec = IndexSpec::from_config(&IndexConfig::default());
        assert_eq!(spec.name, "blogger");
        assert!(spec.recreate_if_exists);
        assert_eq!((spec.shard_count, spec.replica_count), (1, 1));
    }
}
