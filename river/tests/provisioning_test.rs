//! Provisioning and native registration against an embedded node

use river::{
    default_analysis, term_query, ClientHandle, ConnectionConfig, ConnectionManager, EmbeddedNode,
    IndexProvisioner, IndexSpec, NativeRegistrar, ProvisionOutcome, Registrar, DEFAULT_FIELD,
    PERCOLATOR_INDEX,
};
use serde_json::json;
use std::sync::Arc;

fn embedded() -> (Arc<EmbeddedNode>, ClientHandle) {
    let node = EmbeddedNode::start("test-cluster");
    let client: ClientHandle = Arc::new(node.client());
    (node, client)
}

fn native_registrar(client: &ClientHandle) -> Registrar {
    Registrar::new(Arc::new(NativeRegistrar::new(client.clone())))
}

#[tokio::test]
async fn test_fresh_index_gets_default_shape() {
    let manager = ConnectionManager::new(ConnectionConfig::standalone());
    let client = manager.connect().await.unwrap();
    let provisioner = IndexProvisioner::new(client.clone());

    assert!(!client.index_exists("blogger").await.unwrap());
    assert!(provisioner.ensure_index("blogger", true).await);
    assert!(client.index_exists("blogger").await.unwrap());

    let settings = client.index_settings("blogger").await.unwrap().unwrap();
    assert_eq!(settings["index.number_of_shards"], 1);
    assert_eq!(settings["index.number_of_replicas"], 1);
    assert_eq!(settings["index.merge.policy.merge_factor"], 30);
    assert_eq!(settings["analysis"], default_analysis());

    manager.close();
}

#[tokio::test]
async fn test_ensure_without_recreate_is_idempotent() {
    let (node, client) = embedded();
    let provisioner = IndexProvisioner::new(client);
    let spec = IndexSpec::new("blogger");

    assert_eq!(
        provisioner.try_ensure(&spec).await.unwrap(),
        ProvisionOutcome::Created
    );
    assert_eq!(
        provisioner.try_ensure(&spec).await.unwrap(),
        ProvisionOutcome::Existing
    );
    assert!(provisioner.ensure_index("blogger", false).await);

    let stats = node.stats();
    assert_eq!(stats.indices_created, 1);
    assert_eq!(stats.indices_deleted, 0);
}

#[tokio::test]
async fn test_existing_index_keeps_its_settings() {
    let (_node, client) = embedded();
    let provisioner = IndexProvisioner::new(client.clone());

    provisioner
        .try_ensure(&IndexSpec::new("blogger").shards(2))
        .await
        .unwrap();
    provisioner
        .try_ensure(&IndexSpec::new("blogger").shards(5))
        .await
        .unwrap();

    let settings = client.index_settings("blogger").await.unwrap().unwrap();
    assert_eq!(settings["index.number_of_shards"], 2);
}

#[tokio::test]
async fn test_recreate_wipes_stored_queries() {
    let (node, client) = embedded();
    let provisioner = IndexProvisioner::new(client.clone());
    let registrar = native_registrar(&client);

    assert!(provisioner.ensure_index("blogger", true).await);
    registrar.register_all_term("blogger", "jason").await.unwrap();
    registrar
        .register_term_query("blogger", "content", "nyse", Some("q1"))
        .await
        .unwrap();
    assert_eq!(node.stored_query_count("blogger"), 2);

    assert_eq!(
        provisioner
            .try_ensure(&IndexSpec::new("blogger").recreate(true))
            .await
            .unwrap(),
        ProvisionOutcome::Recreated
    );
    assert_eq!(node.stored_query_count("blogger"), 0);
    assert_eq!(
        client
            .get_document(PERCOLATOR_INDEX, "blogger", "q1")
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_custom_analysis_is_applied() {
    let (_node, client) = embedded();
    let provisioner = IndexProvisioner::new(client.clone());
    let analysis = json!({"analyzer": {"tags": {"type": "custom", "tokenizer": "keyword"}}});

    let spec = IndexSpec::new("tags")
        .replicas(0)
        .analysis(analysis.clone());
    assert!(provisioner.ensure_index_with(&spec).await);

    let settings = client.index_settings("tags").await.unwrap().unwrap();
    assert_eq!(settings["analysis"], analysis);
    assert_eq!(settings["index.number_of_replicas"], 0);
    assert_eq!(settings["index.merge.policy.merge_factor"], 30);
}

#[tokio::test]
async fn test_provisioning_failure_returns_false() {
    let (node, client) = embedded();
    let provisioner = IndexProvisioner::new(client);

    assert!(!provisioner.ensure_index("Not-Lowercase", false).await);

    node.close();
    assert!(!provisioner.ensure_index("blogger", true).await);
}

#[tokio::test]
async fn test_generated_ids_are_distinct() {
    let (_node, client) = embedded();
    assert!(IndexProvisioner::new(client.clone()).ensure_index("blogger", true).await);
    let registrar = native_registrar(&client);

    let first = registrar
        .register_term_query("blogger", DEFAULT_FIELD, "jason", None)
        .await
        .unwrap();
    let second = registrar
        .register_term_query("blogger", "content", "nyse", None)
        .await
        .unwrap();

    assert!(!first.is_empty());
    assert!(!second.is_empty());
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_registered_query_round_trips() {
    let (_node, client) = embedded();
    assert!(IndexProvisioner::new(client.clone()).ensure_index("blogger", true).await);
    let registrar = native_registrar(&client);

    for (field, value) in [("_all", "jason"), ("content", "nyse"), ("content", "apple")] {
        let id = registrar
            .register_term_query("blogger", field, value, None)
            .await
            .unwrap();
        let stored = client
            .get_document(PERCOLATOR_INDEX, "blogger", &id)
            .await
            .unwrap();
        assert_eq!(stored, Some(term_query(field, value)));
    }
}

#[tokio::test]
async fn test_register_many_keeps_order() {
    let (_node, client) = embedded();
    assert!(IndexProvisioner::new(client.clone()).ensure_index("blogger", true).await);
    let registrar = native_registrar(&client);

    let values = ["nyse", "google", "apple"];
    let ids = registrar
        .register_many("blogger", "content", &values, false)
        .await
        .unwrap();
    assert_eq!(ids.len(), values.len());

    for (id, value) in ids.iter().zip(values) {
        let id = id.as_deref().unwrap();
        let stored = client
            .get_document(PERCOLATOR_INDEX, "blogger", id)
            .await
            .unwrap();
        assert_eq!(stored, Some(term_query("content", value)));
    }
}

#[tokio::test]
async fn test_registration_without_index_fails() {
    let (_node, client) = embedded();
    let registrar = native_registrar(&client);

    assert!(registrar.register_all_term("missing", "jason").await.is_err());
    let ids = registrar
        .register_many("missing", "content", &["a", "b"], false)
        .await
        .unwrap();
    assert_eq!(ids, vec![None, None]);
}
