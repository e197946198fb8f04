//! Error types for disco.

use thiserror::Error;

/// Errors that stop the server: startup failures and listener failures.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (socket bind, network, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Kubernetes API error
    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The cluster resolver address could not be determined
    #[error("Upstream discovery failed: {0}")]
    UpstreamDiscovery(String),
}
