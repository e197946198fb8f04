//! Configuration types for disco.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    #[serde(default)]
    pub dns: DnsConfig,

    /// Kubernetes access configuration.
    #[serde(default)]
    pub kube: KubeConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// IP address to bind the UDP listener to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// UDP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// TTL in seconds for answers derived from cluster resources.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Upper bound on a single upstream lookup, in milliseconds.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// Fixed upstream resolver; skips discovery of the cluster DNS service.
    #[serde(default)]
    pub upstream_addr: Option<SocketAddr>,
}

impl DnsConfig {
    /// Socket address the UDP listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Upstream lookup bound as a [`Duration`].
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            ttl: default_ttl(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            upstream_addr: None,
        }
    }
}

/// Kubernetes access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeConfig {
    /// Connect through a local API proxy instead of in-cluster credentials.
    /// Only honored by builds with the `development` feature.
    #[serde(default)]
    pub development: bool,

    /// API server URL used in development mode (usually `kubectl proxy`).
    #[serde(default = "default_development_api_url")]
    pub development_api_url: String,

    /// Bearer token for development mode, injected from the environment.
    #[serde(default)]
    pub development_token: Option<String>,

    /// Namespace of the cluster DNS service.
    #[serde(default = "default_dns_service_namespace")]
    pub dns_service_namespace: String,

    /// Name of the cluster DNS service.
    #[serde(default = "default_dns_service_name")]
    pub dns_service_name: String,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            development: false,
            development_api_url: default_development_api_url(),
            development_token: None,
            dns_service_namespace: default_dns_service_namespace(),
            dns_service_name: default_dns_service_name(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "disco_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    53
}

fn default_ttl() -> u32 {
    crate::resolver::DEFAULT_TTL
}

fn default_upstream_timeout_ms() -> u64 {
    2000
}

fn default_development_api_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_dns_service_namespace() -> String {
    "kube-system".to_string()
}

fn default_dns_service_name() -> String {
    "kube-dns".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
