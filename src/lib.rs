//! Disco DNS - dynamic DNS for annotated Kubernetes pods and services.
//!
//! Pods and services carrying a `disco.min.io` annotation get an A record
//! whose domain is computed from the annotation value, a template evaluated
//! against the object itself. Everything else is forwarded to the cluster's
//! own resolver.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                              disco                                │
//! │                                                                   │
//! │  ┌──────────────┐   ┌────────────┐   ┌──────────────┐             │
//! │  │ Pod/Service  │──▶│ Reconciler │──▶│ RecordStore  │             │
//! │  │ watches      │   │ (template) │   │ exact|suffix │             │
//! │  └──────────────┘   └────────────┘   └──────┬───────┘             │
//! │                                             │                     │
//! │                                             ▼                     │
//! │                                      ┌──────────────┐             │
//! │                         UDP :53 ───▶ │QueryResolver │──▶ upstream │
//! │                                      └──────────────┘  (kube-dns) │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Templates
//!
//! ```text
//! metadata.annotations["disco.min.io"] = "{metadata.name}.{metadata.namespace}"
//!   pod worker-1 in default  → worker-1.default.  A <pod IP>
//!   service api in default   → api.default.       A <cluster IP>
//!                              *.api.default.     A <cluster IP> (suffix)
//! ```
//!
//! ## Query resolution
//!
//! 1. exact record for the query name
//! 2. longest service domain the query name ends with
//! 3. the cluster resolver, answer passed through unchanged
//! 4. otherwise an empty NOERROR reply

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod reconciler;
pub mod resolver;
pub mod resource;
pub mod server;
pub mod state;
pub mod subscription;
pub mod telemetry;
pub mod template;
pub mod upstream;

// Re-export main types
pub use config::{Config, DnsConfig, KubeConfig, TelemetryConfig};
pub use error::DnsError;
pub use reconciler::{EventKind, Reconciler, Transition};
pub use resolver::QueryResolver;
pub use resource::{ResourceKind, Snapshot};
pub use server::DnsServer;
pub use state::RecordStore;
pub use template::TemplateResolver;
pub use upstream::{Upstream, UpstreamForwarder};
