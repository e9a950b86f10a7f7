//! Remote transport client against an embedded node serving HTTP

use river::{
    ClientHandle, ClusterAddress, ConnectionConfig, ConnectionManager, EmbeddedNode, Error,
    IndexProvisioner, IndexSpec, NativeRegistrar, ProvisionOutcome, Registrar, SearchClient,
    TransportClient, TransportSettings, PERCOLATOR_INDEX,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const CLUSTER: &str = "BloggerCluster";

async fn start_node() -> (Arc<EmbeddedNode>, ClusterAddress) {
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let node = EmbeddedNode::start_with_http(CLUSTER, bind).await.unwrap();
    let addr = node.http_address().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    (node, ClusterAddress::new(addr.ip().to_string(), addr.port()))
}

/// An address nothing listens on
fn dead_address() -> ClusterAddress {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    ClusterAddress::new("127.0.0.1", addr.port())
}

fn settings(sniff: bool) -> TransportSettings {
    TransportSettings {
        cluster_name: CLUSTER.to_string(),
        sniff,
        nodes_sampler_interval: Duration::from_secs(60),
        ping_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_connect_sniffs_publish_addresses() {
    let (node, address) = start_node().await;
    let client = TransportClient::new(settings(true))
        .unwrap()
        .add_transport_address(&address)
        .connect()
        .await
        .unwrap();

    let bound = node.http_address().unwrap();
    assert_eq!(client.connected_nodes(), vec![format!("http://{}", bound)]);
    assert!(client.ping().await.is_ok());

    client.close();
    assert!(client.is_closed());
    assert!(matches!(client.index_exists("blogger").await, Err(Error::Closed)));
}

#[tokio::test]
async fn test_cluster_name_mismatch_is_refused() {
    let (_node, address) = start_node().await;
    let mut settings = settings(false);
    settings.cluster_name = "OtherCluster".to_string();

    let result = TransportClient::new(settings)
        .unwrap()
        .add_transport_address(&address)
        .connect()
        .await;
    match result {
        Err(Error::ClusterNameMismatch { expected, actual }) => {
            assert_eq!(expected, "OtherCluster");
            assert_eq!(actual, CLUSTER);
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("connected to the wrong cluster"),
    }
}

#[tokio::test]
async fn test_unreachable_seed_fails_to_connect() {
    let result = TransportClient::new(settings(true))
        .unwrap()
        .add_transport_address(&dead_address())
        .connect()
        .await;
    assert!(matches!(result, Err(Error::Connection(_))));
}

#[tokio::test]
async fn test_requests_fail_over_to_live_node() {
    let (node, address) = start_node().await;
    let client: ClientHandle = TransportClient::new(settings(false))
        .unwrap()
        .add_transport_address(&dead_address())
        .add_transport_address(&address)
        .connect()
        .await
        .unwrap();

    // Every call lands on the live node whichever seed the rotation starts at
    for _ in 0..4 {
        assert!(!client.index_exists("blogger").await.unwrap());
    }
    client.create_index("blogger", &json!({})).await.unwrap();
    assert!(client.index_exists("blogger").await.unwrap());
    assert_eq!(node.stats().indices_created, 1);
}

#[tokio::test]
async fn test_provision_and_register_over_transport() {
    let (node, address) = start_node().await;
    let client: ClientHandle = TransportClient::new(settings(true))
        .unwrap()
        .add_transport_address(&address)
        .connect()
        .await
        .unwrap();
    let provisioner = IndexProvisioner::new(client.clone());

    assert_eq!(
        provisioner.try_ensure(&IndexSpec::new("blogger")).await.unwrap(),
        ProvisionOutcome::Created
    );
    assert_eq!(
        provisioner
            .try_ensure(&IndexSpec::new("blogger").recreate(true))
            .await
            .unwrap(),
        ProvisionOutcome::Recreated
    );

    let settings = client.index_settings("blogger").await.unwrap().unwrap();
    assert_eq!(settings["index.number_of_shards"], 1);
    assert_eq!(client.index_settings("missing").await.unwrap(), None);

    let registrar = Registrar::new(Arc::new(NativeRegistrar::new(client.clone())));
    let id = registrar
        .register_term_query("blogger", "content", "nyse", Some("q 1"))
        .await
        .unwrap();
    assert_eq!(id, "q 1");
    let generated = registrar.register_all_term("blogger", "jason").await.unwrap();

    assert_eq!(node.stored_query_count("blogger"), 2);
    assert_eq!(
        client
            .get_document(PERCOLATOR_INDEX, "blogger", &generated)
            .await
            .unwrap(),
        Some(json!({"query": {"term": {"_all": "jason"}}}))
    );
    assert_eq!(
        client
            .get_document(PERCOLATOR_INDEX, "blogger", "nope")
            .await
            .unwrap(),
        None
    );

    client.delete_index("blogger").await.unwrap();
    assert!(matches!(
        client.delete_index("blogger").await,
        Err(Error::IndexNotFound(_))
    ));
    assert!(matches!(
        client.create_index("Bad Name", &json!({})).await,
        Err(Error::Backend { status: 400, .. })
    ));
}

#[tokio::test]
async fn test_cluster_mode_connection_manager() {
    let (_node, address) = start_node().await;
    let mut config = ConnectionConfig::cluster(address.host.clone(), address.port);
    config.cluster_name = CLUSTER.to_string();
    config.use_http_protocol = true;

    let manager = ConnectionManager::new(config);
    let first = manager.connect().await.unwrap();
    let second = manager.connect().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(manager.embedded_node().is_none());
    assert_eq!(manager.http_pool().unwrap().base_url(), address.base_url());

    assert!(IndexProvisioner::new(first.clone()).ensure_index("blogger", true).await);
    let registrar = manager.registrar().unwrap();
    assert_eq!(registrar.protocol(), "http");
    assert_eq!(
        registrar
            .register_term_query("blogger", "content", "google", Some("q1"))
            .await
            .unwrap(),
        "q1"
    );

    manager.close();
    assert!(matches!(first.ping().await, Err(Error::Closed)));
}
