//! Blogger River - stored-query registration against a search backend
//!
//! Keeps a target index provisioned and registers percolation queries
//! (queries saved server-side and later matched against incoming documents)
//! in its reserved namespace.
//!
//! # Architecture
//!
//! - **Address**: resolves cluster vs. standalone endpoints
//! - **Transport**: the client API, spoken by a remote transport client with
//!   node sniffing or by an in-process embedded node
//! - **Connection**: owns the client, the embedded node and the HTTP pool,
//!   releasing each exactly once
//! - **Provisioner**: exists / delete / create with the river's analysis,
//!   shard and replica settings
//! - **Registrar**: native and HTTP/JSON registration behind one trait
//! - **Supervisor**: the background worker driving the above from a
//!   [`WorkSource`]

pub mod address;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod provisioner;
pub mod registrar;
pub mod resource;
pub mod supervisor;
pub mod transport;
pub mod work;

pub use address::{resolve, ClusterAddress};
pub use config::{Config, ConnectionConfig, IndexConfig, Mode, RiverSettings};
pub use connection::ConnectionManager;
pub use error::{Error, Result};
pub use provisioner::{default_analysis, IndexProvisioner, IndexSpec, ProvisionOutcome};
pub use registrar::{
    term_query, HttpPool, HttpRegistrar, NativeRegistrar, QueryRegistrar, Registrar, StoredQuery,
    DEFAULT_FIELD,
};
pub use resource::{Owned, Release};
pub use supervisor::River;
pub use transport::{
    ClientHandle, EmbeddedNode, IndexResponse, LocalClient, NodeStats, SearchClient,
    TransportClient, TransportSettings, PERCOLATOR_INDEX,
};
pub use work::{channel, ChannelSource, DemoBatch, Work, WorkSender, WorkSource};
