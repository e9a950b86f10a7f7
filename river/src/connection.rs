//! Connection manager
//!
//! Owns at most one client per instance: a [`TransportClient`] in cluster
//! mode, or a client bound to an [`EmbeddedNode`] in standalone mode. When
//! the HTTP protocol is selected it also owns an [`HttpPool`] for the HTTP
//! registration path. Everything it creates is released by [`close`]; a
//! client handed in by the host is used but never released.
//!
//! [`close`]: ConnectionManager::close

use crate::address::{self, ClusterAddress};
use crate::config::{ConnectionConfig, Mode};
use crate::error::{Error, Result};
use crate::metrics;
use crate::registrar::{HttpPool, HttpRegistrar, NativeRegistrar, Registrar};
use crate::resource::{Owned, Release};
use crate::transport::{ClientHandle, EmbeddedNode, TransportClient, TransportSettings};
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

enum ClientSlot {
    Empty,
    /// Created here, released on close
    Owned(Owned<ClientHandle>),
    /// Supplied by the host, left open on close
    Borrowed(ClientHandle),
}

impl ClientSlot {
    fn handle(&self) -> Option<ClientHandle> {
        match self {
            ClientSlot::Empty => None,
            ClientSlot::Owned(owned) => owned.get().cloned(),
            ClientSlot::Borrowed(client) => Some(client.clone()),
        }
    }
}

struct State {
    client: ClientSlot,
    node: Option<Owned<Arc<EmbeddedNode>>>,
    http: Option<Owned<Arc<HttpPool>>>,
}

/// Resources created by one connect call, adopted into [`State`] afterwards
struct Created {
    client: ClientHandle,
    node: Option<Arc<EmbeddedNode>>,
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Mutex<State>,
    connecting: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                client: ClientSlot::Empty,
                node: None,
                http: None,
            }),
            connecting: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Use a client owned by the host instead of creating one
    pub fn with_external_client(config: ConnectionConfig, client: ClientHandle) -> Self {
        let manager = Self::new(config);
        manager.state.lock().client = ClientSlot::Borrowed(client);
        manager
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn resolve(&self) -> ClusterAddress {
        address::resolve(&self.config)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().client.handle().is_some()
    }

    /// Active client, if connected
    pub fn client(&self) -> Option<ClientHandle> {
        self.state.lock().client.handle()
    }

    /// Embedded node started by this manager
    pub fn embedded_node(&self) -> Option<Arc<EmbeddedNode>> {
        self.state
            .lock()
            .node
            .as_ref()
            .and_then(|node| node.get().cloned())
    }

    pub fn http_pool(&self) -> Option<Arc<HttpPool>> {
        self.state
            .lock()
            .http
            .as_ref()
            .and_then(|pool| pool.get().cloned())
    }

    /// Return the client, creating it on first use
    pub async fn connect(&self) -> Result<ClientHandle> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let _connecting = self.connecting.lock().await;
        {
            let state = self.state.lock();
            if let Some(client) = state.client.handle() {
                if !self.config.use_http_protocol || state.http.is_some() {
                    return Ok(client);
                }
            }
        }

        let address = self.resolve();
        let mode = match self.config.mode {
            Mode::Cluster => "cluster",
            Mode::Standalone => "standalone",
        };

        let existing = self.state.lock().client.handle();
        let created = match existing {
            Some(_) => None,
            None => {
                let result = match self.config.mode {
                    Mode::Cluster => self.connect_cluster(&address).await,
                    Mode::Standalone => self.connect_standalone(&address).await,
                };
                metrics::record_connect(mode, result.is_ok());
                Some(result?)
            }
        };

        let http = if self.config.use_http_protocol {
            let node = created
                .as_ref()
                .and_then(|c| c.node.clone())
                .or_else(|| self.embedded_node());
            let base_url = match node.as_ref().and_then(|n| n.http_address()) {
                Some(bound) => format!("http://{}", bound),
                None => address.base_url(),
            };
            let pool = HttpPool::new(base_url, self.config.ping_timeout())?;
            debug!(base_url = %pool.base_url(), "Created HTTP connection pool");
            Some(Arc::new(pool))
        } else {
            None
        };

        // Wrap before taking the state lock so a close that raced this
        // connect still releases what was just created
        let created = created.map(|c| (Owned::new(c.client), c.node.map(Owned::new)));
        let http = http.map(Owned::new);

        let mut state = self.state.lock();
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if let Some((client, node)) = created {
            state.client = ClientSlot::Owned(client);
            if node.is_some() {
                state.node = node;
            }
        }
        if http.is_some() {
            state.http = http;
        }

        info!(
            mode,
            address = %address,
            http = self.config.use_http_protocol,
            "Connected"
        );
        state.client.handle().ok_or(Error::Closed)
    }

    async fn connect_cluster(&self, address: &ClusterAddress) -> Result<Created> {
        let settings = TransportSettings::from_config(&self.config);
        let client: ClientHandle = TransportClient::new(settings)?
            .add_transport_address(address)
            .connect()
            .await?;
        Ok(Created {
            client,
            node: None,
        })
    }

    async fn connect_standalone(&self, address: &ClusterAddress) -> Result<Created> {
        let node = match self.embedded_node() {
            Some(node) => node,
            None => {
                let embedded = &self.config.embedded;
                if embedded.http_enabled || self.config.use_http_protocol {
                    let bind = embedded
                        .http_bind
                        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::LOCALHOST, address.port)));
                    EmbeddedNode::start_with_http(&self.config.cluster_name, bind).await?
                } else {
                    EmbeddedNode::start(&self.config.cluster_name)
                }
            }
        };
        let client: ClientHandle = Arc::new(node.client());
        Ok(Created {
            client,
            node: Some(node),
        })
    }

    /// Registrar for the protocol selected in the config
    pub fn registrar(&self) -> Result<Registrar> {
        let state = self.state.lock();
        if self.config.use_http_protocol {
            let pool = state
                .http
                .as_ref()
                .and_then(|pool| pool.get().cloned())
                .ok_or_else(|| Error::Connection("HTTP pool not created".into()))?;
            Ok(Registrar::new(Arc::new(HttpRegistrar::new(pool))))
        } else {
            let client = state
                .client
                .handle()
                .ok_or_else(|| Error::Connection("not connected".into()))?;
            Ok(Registrar::new(Arc::new(NativeRegistrar::new(client))))
        }
    }

    /// Release everything this manager created. Safe to call before connect
    /// and more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Connection manager already closed");
            return;
        }

        let (node, http, client) = {
            let mut state = self.state.lock();
            (
                state.node.take(),
                state.http.take(),
                std::mem::replace(&mut state.client, ClientSlot::Empty),
            )
        };

        // Node first, then the pool, each independently
        if let Some(mut node) = node {
            release_logged(&mut node);
        }
        if let Some(mut http) = http {
            release_logged(&mut http);
        }
        match client {
            ClientSlot::Owned(mut client) => release_logged(&mut client),
            ClientSlot::Borrowed(_) => debug!("Leaving host-owned client open"),
            ClientSlot::Empty => {}
        }

        info!("Connection manager closed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn release_logged<T: Release>(resource: &mut Owned<T>) {
    let name = resource.get().map(|r| r.resource_name()).unwrap_or("resource");
    match resource.release() {
        Ok(true) => metrics::record_release(name),
        Ok(false) => {}
        Err(e) => warn!(resource = name, error = %e, "Failed to release resource"),
    }
}
