//! River error types

use thiserror::Error;

/// Errors that can occur while talking to the search backend
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {reason}")]
    Backend { status: u16, reason: String },

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("No node available: {0}")]
    NoNodeAvailable(String),

    #[error("Cluster name mismatch: expected '{expected}', node reports '{actual}'")]
    ClusterNameMismatch { expected: String, actual: String },

    #[error("Embedded node is closed")]
    NodeClosed,

    #[error("River is closed")]
    Closed,

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Response carried no document id")]
    MissingId,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Get the error type as a string for metrics labeling
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Connection(_) => "connection",
            Error::Http(_) => "http",
            Error::Backend { .. } => "backend",
            Error::IndexNotFound(_) => "index_not_found",
            Error::IndexAlreadyExists(_) => "index_already_exists",
            Error::NoNodeAvailable(_) => "no_node_available",
            Error::ClusterNameMismatch { .. } => "cluster_name_mismatch",
            Error::NodeClosed => "node_closed",
            Error::Closed => "closed",
            Error::Unsupported(_) => "unsupported",
            Error::MissingId => "missing_id",
            Error::Json(_) => "json",
            Error::Io(_) => "io",
            Error::Config(_) => "config",
        }
    }

    /// Whether retrying the same call later could succeed.
    ///
    /// Misuse (`Unsupported`) and shutdown (`Closed`) are final.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Error::Unsupported(_) | Error::Closed | Error::Config(_) | Error::ClusterNameMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_is_not_transient() {
        let err = Error::Unsupported("bulk registration");
        assert!(!err.is_transient());
        assert_eq!(err.error_type(), "unsupported");
        assert_eq!(err.to_string(), "Unsupported operation: bulk registration");
    }

    #[test]
    fn test_connection_is_transient() {
        assert!(Error::Connection("refused".into()).is_transient());
        assert!(Error::NoNodeAvailable("127.0.0.1:9200".into()).is_transient());
    }
}
