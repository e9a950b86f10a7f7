//! Tests for config module

use river::config::{Config, Mode};
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.connection.mode, Mode::Cluster);
    assert_eq!(config.connection.host, "127.0.0.1");
    assert_eq!(config.connection.port, 9200);
    assert_eq!(config.connection.retry_interval(), Duration::from_millis(1000));
    assert!(!config.connection.embedded.http_enabled);
    assert_eq!(config.index.name, "blogger");
    assert!(config.index.recreate);
    assert_eq!((config.index.shards, config.index.replicas), (1, 1));
    assert!(config.index.analysis.is_none());
    assert_eq!(config.observability.log_format, "pretty");
}

#[test]
fn test_load_or_create_writes_defaults() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("conf").join("river.toml");

    let config = Config::load_or_create(&path).unwrap();
    assert!(path.exists());
    assert_eq!(config.index.name, "blogger");

    let reloaded = Config::load_or_create(&path).unwrap();
    assert_eq!(reloaded.connection.cluster_name, "BloggerCluster");
    assert_eq!(reloaded.index.shards, 1);
}

#[test]
fn test_load_partial_file() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("river.toml");
    std::fs::write(
        &path,
        r#"
[connection]
mode = "standalone"
use_http_protocol = true
unknown_key = "ignored"

[connection.embedded]
http_bind = "127.0.0.1:0"

[index]
name = "posts"
recreate = false
replicas = 0

[index.analysis.analyzer.plain]
type = "whitespace"

[river.jms]
user = "alice"
pass = "s3cret"

[river.index]
bulkSize = 50
bulkTimeout = "2s"
ordered = true
"#,
    )
    .unwrap();

    let config = Config::load_or_create(&path).unwrap();
    assert_eq!(config.connection.mode, Mode::Standalone);
    assert!(config.connection.use_http_protocol);
    assert!(config.connection.sniff);
    assert_eq!(
        config.connection.embedded.http_bind,
        Some("127.0.0.1:0".parse().unwrap())
    );
    assert_eq!(config.index.name, "posts");
    assert!(!config.index.recreate);
    assert_eq!(config.index.shards, 1);
    assert_eq!(config.index.replicas, 0);
    assert_eq!(
        config.index.analysis.as_ref().unwrap()["analyzer"]["plain"]["type"],
        "whitespace"
    );

    let settings = config.river_settings("posts");
    assert_eq!(settings.source.user, "alice");
    assert_eq!(settings.source.password, "s3cret");
    assert_eq!(settings.source.consumer_name, "blogger_elasticsearch_river_posts");
    assert_eq!(settings.bulk_size, 50);
    assert_eq!(settings.bulk_timeout, Duration::from_secs(2));
    assert!(settings.ordered);
}

#[test]
fn test_save_round_trip() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("river.toml");

    let mut config = Config::default();
    config.connection.port = 9301;
    config.index.name = "archive".to_string();
    config.save(&path).unwrap();

    let loaded = Config::load_or_create(&path).unwrap();
    assert_eq!(loaded.connection.port, 9301);
    assert_eq!(loaded.index.name, "archive");
}

#[test]
fn test_invalid_toml_is_an_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("river.toml");
    std::fs::write(&path, "[connection\nport = ").unwrap();
    assert!(Config::load_or_create(&path).is_err());
}
