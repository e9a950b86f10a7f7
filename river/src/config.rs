//! River configuration
//!
//! The TOML file carries the connection, index and logging sections. The
//! `[river]` table is the raw river settings document and is parsed
//! leniently by [`RiverSettings::from_value`], the same way a river `_meta`
//! document would be.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Raw river settings document
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub river: Value,
}

/// How the river reaches the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Remote cluster through the transport client
    #[default]
    Cluster,
    /// In-process embedded node
    Standalone,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub mode: Mode,

    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Cluster host, ignored in standalone mode
    #[serde(default = "default_host")]
    pub host: String,

    /// Cluster port, ignored in standalone mode
    #[serde(default = "default_port")]
    pub port: u16,

    /// Register stored queries through the HTTP/JSON API instead of the client
    #[serde(default)]
    pub use_http_protocol: bool,

    /// Discover the other cluster nodes from the seed
    #[serde(default = "default_true")]
    pub sniff: bool,

    #[serde(default = "default_sampler_interval")]
    pub sampler_interval_secs: u64,

    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,

    /// Pause before the supervising loop retries a failed iteration
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,

    #[serde(default)]
    pub embedded: EmbeddedConfig,
}

fn default_cluster_name() -> String {
    "BloggerCluster".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9200
}

fn default_true() -> bool {
    true
}

fn default_sampler_interval() -> u64 {
    60
}

fn default_ping_timeout() -> u64 {
    30
}

fn default_retry_interval() -> u64 {
    1000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            cluster_name: default_cluster_name(),
            host: default_host(),
            port: default_port(),
            use_http_protocol: false,
            sniff: default_true(),
            sampler_interval_secs: default_sampler_interval(),
            ping_timeout_secs: default_ping_timeout(),
            retry_interval_ms: default_retry_interval(),
            embedded: EmbeddedConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Standalone configuration with every other field defaulted
    pub fn standalone() -> Self {
        Self {
            mode: Mode::Standalone,
            ..Default::default()
        }
    }

    /// Cluster configuration pointing at `host:port`
    pub fn cluster(host: impl Into<String>, port: u16) -> Self {
        Self {
            mode: Mode::Cluster,
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn sampler_interval(&self) -> Duration {
        Duration::from_secs(self.sampler_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Embedded node settings (standalone mode only)
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EmbeddedConfig {
    /// Serve the REST API of the embedded node on a local listener
    #[serde(default)]
    pub http_enabled: bool,

    /// Listener address override, defaults to the resolved standalone address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_bind: Option<SocketAddr>,
}

/// Target index shape
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_name")]
    pub name: String,

    /// Drop and recreate the index when the worker first provisions it
    #[serde(default = "default_true")]
    pub recreate: bool,

    #[serde(default = "default_shards")]
    pub shards: u32,

    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// Custom analysis document, replaces the built-in analyzers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
}

fn default_index_name() -> String {
    "blogger".to_string()
}

fn default_shards() -> u32 {
    1
}

fn default_replicas() -> u32 {
    1
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
            recreate: default_true(),
            shards: default_shards(),
            replicas: default_replicas(),
            analysis: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log output format: "pretty" or "json"
    /// Override with LOG_FORMAT env var
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter string
    /// Override with RUST_LOG env var
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_level() -> String {
    "info,river=debug".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load config from file path, or create default
    pub fn load_or_create(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = config.save(config_path);
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Parsed view of the `[river]` settings document
    pub fn river_settings(&self, river_name: &str) -> RiverSettings {
        RiverSettings::from_value(river_name, &self.river)
    }
}

/// Settings read from the river document.
///
/// Only the source descriptors are logged at start; the bulk settings are
/// reserved for a batching feature and are never consumed by provisioning
/// or registration.
#[derive(Clone, PartialEq)]
pub struct RiverSettings {
    pub source: SourceSettings,
    pub bulk_size: usize,
    pub bulk_timeout: Duration,
    pub ordered: bool,
}

/// Upstream source descriptors
#[derive(Clone, PartialEq)]
pub struct SourceSettings {
    pub user: String,
    pub password: String,
    pub provider_url: String,
    pub source_type: String,
    pub source_name: String,
    pub consumer_name: String,
}

impl std::fmt::Debug for SourceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSettings")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("provider_url", &self.provider_url)
            .field("source_type", &self.source_type)
            .field("source_name", &self.source_name)
            .field("consumer_name", &self.consumer_name)
            .finish()
    }
}

impl std::fmt::Debug for RiverSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiverSettings")
            .field("source", &self.source)
            .field("bulk_size", &self.bulk_size)
            .field("bulk_timeout", &self.bulk_timeout)
            .field("ordered", &self.ordered)
            .finish()
    }
}

const DEFAULT_BULK_SIZE: usize = 100;
const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_millis(10);
const FALLBACK_BULK_TIMEOUT: Duration = Duration::from_secs(10);

impl RiverSettings {
    /// Parse a river settings document. Missing sections fall back to the
    /// defaults and unknown keys are ignored.
    pub fn from_value(river_name: &str, settings: &Value) -> Self {
        let source_section = settings.get("jms").or_else(|| settings.get("blogger"));
        let source = SourceSettings {
            user: node_string(source_section.and_then(|s| s.get("user")), "user"),
            password: node_string(source_section.and_then(|s| s.get("pass")), "password"),
            provider_url: node_string(
                source_section.and_then(|s| s.get("provider_url")),
                "vm://localhost",
            ),
            source_type: node_string(source_section.and_then(|s| s.get("source_type")), "queue"),
            source_name: node_string(
                source_section.and_then(|s| s.get("source_name")),
                "elasticsearch",
            ),
            consumer_name: format!("blogger_elasticsearch_river_{}", river_name),
        };

        let Some(index) = settings.get("index") else {
            return Self {
                source,
                bulk_size: DEFAULT_BULK_SIZE,
                bulk_timeout: DEFAULT_BULK_TIMEOUT,
                ordered: false,
            };
        };

        let bulk_size = node_usize(index.get("bulkSize"), DEFAULT_BULK_SIZE);
        let bulk_timeout = match index.get("bulkTimeout") {
            Some(raw) => {
                let text = node_string(Some(raw), "10s");
                parse_time_value(&text).unwrap_or_else(|| {
                    tracing::warn!(value = %text, "Unparsable bulkTimeout, using 10s");
                    FALLBACK_BULK_TIMEOUT
                })
            }
            None => DEFAULT_BULK_TIMEOUT,
        };
        let ordered = node_bool(index.get("ordered"), false);

        Self {
            source,
            bulk_size,
            bulk_timeout,
            ordered,
        }
    }
}

fn node_string(value: Option<&Value>, default: &str) -> String {
    match value {
        None | Some(Value::Null) => default.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn node_usize(value: Option<&Value>, default: usize) -> usize {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f as u64))
            .map(|n| n as usize)
            .unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn node_bool(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !matches!(s.as_str(), "false" | "0" | "off" | "no"),
        _ => default,
    }
}

/// Parse a time value such as `10s`, `500ms` or `1.5m`. A bare number is
/// milliseconds.
pub fn parse_time_value(text: &str) -> Option<Duration> {
    let text = text.trim().to_ascii_lowercase();
    let (number, millis_per_unit) = if let Some(n) = text.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = text.strip_suffix('s') {
        (n, 1_000.0)
    } else if let Some(n) = text.strip_suffix('m') {
        (n, 60_000.0)
    } else if let Some(n) = text.strip_suffix('h') {
        (n, 3_600_000.0)
    } else if let Some(n) = text.strip_suffix('d') {
        (n, 86_400_000.0)
    } else if let Some(n) = text.strip_suffix('w') {
        (n, 604_800_000.0)
    } else {
        (text.as_str(), 1.0)
    };

    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(Duration::from_millis((value * millis_per_unit) as u64))
}
