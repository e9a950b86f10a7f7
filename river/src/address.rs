//! Cluster address resolution

use crate::config::{ConnectionConfig, Mode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Host used by an embedded node
pub const LOCAL_HOST: &str = "localhost";

/// Port used by an embedded node
pub const LOCAL_PORT: u16 = 9200;

/// Unresolved endpoint of the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterAddress {
    pub host: String,
    pub port: u16,
}

impl ClusterAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Fixed loopback endpoint of a standalone node
    pub fn local() -> Self {
        Self::new(LOCAL_HOST, LOCAL_PORT)
    }

    /// Base URL for HTTP requests against this address
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ClusterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Turn the connection config into the endpoint to connect to
pub fn resolve(config: &ConnectionConfig) -> ClusterAddress {
    match config.mode {
        Mode::Cluster => ClusterAddress::new(config.host.clone(), config.port),
        Mode::Standalone => ClusterAddress::local(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_mode_uses_configured_endpoint() {
        let config = ConnectionConfig::cluster("es-1.internal", 9301);
        let address = resolve(&config);
        assert_eq!(address, ClusterAddress::new("es-1.internal", 9301));
        assert_eq!(address.base_url(), "http://es-1.internal:9301");
    }

    #[test]
    fn test_standalone_ignores_configured_endpoint() {
        let mut config = ConnectionConfig::standalone();
        config.host = "10.0.0.5".into();
        config.port = 9999;
        assert_eq!(resolve(&config), ClusterAddress::local());
        assert_eq!(resolve(&config).to_string(), "localhost:9200");
    }

    #[test]
    fn test_resolve_is_pure() {
        for config in [ConnectionConfig::standalone(), ConnectionConfig::cluster("a", 1)] {
            assert_eq!(resolve(&config), resolve(&config));
        }
    }
}
