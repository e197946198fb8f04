//! Fallback forwarding to the cluster's own resolver.

use async_trait::async_trait;
use hickory_proto::rr::{Name, Record, RecordType};
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{ResolveError, TokioResolver};
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::DnsError;
use crate::metrics::{self, ForwardFailure};

/// Port the cluster resolver listens on.
pub const UPSTREAM_PORT: u16 = 53;

/// Why a forwarded lookup produced nothing.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Upstream did not answer within the configured bound.
    #[error("upstream lookup timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream answered with an error or could not be reached.
    #[error("upstream lookup failed: {0}")]
    Resolve(#[from] ResolveError),
}

/// Something that can answer A queries the local store cannot.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Look up `name` and return at most one answer, passed through as is.
    async fn forward(&self, name: &Name) -> Option<Record>;
}

/// Forwards A lookups to a single upstream name server.
pub struct UpstreamForwarder {
    resolver: TokioResolver,
    addr: SocketAddr,
    timeout: Duration,
}

impl UpstreamForwarder {
    /// Create a forwarder for the name server at `addr`.
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        let name_servers = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], name_servers);

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        // Answers must reflect the upstream as it is right now.
        opts.cache_size = 0;

        let resolver = TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(opts)
            .build();

        Self {
            resolver,
            addr,
            timeout,
        }
    }

    /// Address of the upstream name server.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn lookup(&self, name: &Name) -> Result<Option<Record>, ForwardError> {
        let lookup = tokio::time::timeout(
            self.timeout,
            self.resolver.lookup(name.clone(), RecordType::A),
        )
        .await
        .map_err(|_| ForwardError::Timeout(self.timeout))??;

        // CNAME chains come back ahead of the address they lead to.
        Ok(lookup
            .records()
            .iter()
            .find(|record| record.record_type() == RecordType::A)
            .cloned())
    }
}

#[async_trait]
impl Upstream for UpstreamForwarder {
    async fn forward(&self, name: &Name) -> Option<Record> {
        match self.lookup(name).await {
            Ok(record) => record,
            Err(ForwardError::Timeout(after)) => {
                warn!(%name, upstream = %self.addr, ?after, "upstream lookup timed out");
                metrics::record_forward_failure(ForwardFailure::Timeout);
                None
            }
            Err(e) => {
                debug!(%name, upstream = %self.addr, error = %e, "upstream lookup failed");
                metrics::record_forward_failure(ForwardFailure::Error);
                None
            }
        }
    }
}

/// Find the cluster IP of the cluster DNS service (e.g. `kube-system/kube-dns`).
pub async fn discover_cluster_resolver(
    client: Client,
    namespace: &str,
    name: &str,
) -> Result<SocketAddr, DnsError> {
    let services: Api<Service> = Api::namespaced(client, namespace);
    let service = services.get(name).await?;

    let cluster_ip = service
        .spec
        .and_then(|spec| spec.cluster_ip)
        .ok_or_else(|| {
            DnsError::UpstreamDiscovery(format!("service {namespace}/{name} has no cluster IP"))
        })?;

    let ip: IpAddr = cluster_ip.parse().map_err(|_| {
        DnsError::UpstreamDiscovery(format!(
            "service {namespace}/{name} has unusable cluster IP {cluster_ip:?}"
        ))
    })?;

    let addr = SocketAddr::new(ip, UPSTREAM_PORT);
    info!(service = %format!("{namespace}/{name}"), %addr, "discovered cluster resolver");
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{Message, MessageType, OpCode};
    use hickory_proto::rr::rdata::{A, CNAME};
    use hickory_proto::rr::RData;
    use std::net::Ipv4Addr;
    use tokio::net::UdpSocket;

    /// Name server on loopback that answers every query with `answers`.
    async fn stub_upstream(answers: Vec<Record>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let Ok(request) = Message::from_vec(&buf[..len]) else {
                    continue;
                };

                let mut response = Message::new();
                response
                    .set_id(request.id())
                    .set_message_type(MessageType::Response)
                    .set_op_code(OpCode::Query)
                    .set_recursion_desired(request.recursion_desired())
                    .set_recursion_available(true);
                response.add_queries(request.queries().iter().cloned());
                response.add_answers(answers.clone());

                let _ = socket.send_to(&response.to_vec().unwrap(), src).await;
            }
        });

        addr
    }

    fn a_record(name: &str, ip: Ipv4Addr, ttl: u32) -> Record {
        Record::from_rdata(Name::from_ascii(name).unwrap(), ttl, RData::A(A(ip)))
    }

    #[tokio::test]
    async fn test_forward_passes_answer_through() {
        let addr = stub_upstream(vec![a_record(
            "example.com.",
            Ipv4Addr::new(93, 184, 216, 34),
            120,
        )])
        .await;
        let forwarder = UpstreamForwarder::new(addr, Duration::from_secs(2));

        let record = forwarder
            .forward(&Name::from_ascii("example.com.").unwrap())
            .await
            .expect("upstream answer");

        assert_eq!(record.record_type(), RecordType::A);
        assert_eq!(record.name().to_string(), "example.com.");
        assert_eq!(record.ttl(), 120);
        assert_eq!(record.data(), &RData::A(A(Ipv4Addr::new(93, 184, 216, 34))));
    }

    #[tokio::test]
    async fn test_forward_skips_cname_to_address() {
        let alias = Record::from_rdata(
            Name::from_ascii("www.example.com.").unwrap(),
            300,
            RData::CNAME(CNAME(Name::from_ascii("edge.example.net.").unwrap())),
        );
        let target = a_record("edge.example.net.", Ipv4Addr::new(1, 2, 3, 4), 60);
        let addr = stub_upstream(vec![alias, target]).await;
        let forwarder = UpstreamForwarder::new(addr, Duration::from_secs(2));

        let record = forwarder
            .forward(&Name::from_ascii("www.example.com.").unwrap())
            .await
            .expect("upstream answer");

        assert_eq!(record.record_type(), RecordType::A);
        assert_eq!(record.data(), &RData::A(A(Ipv4Addr::new(1, 2, 3, 4))));
    }

    #[tokio::test]
    async fn test_unresponsive_upstream_times_out() {
        // Bound but never read: queries go unanswered.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let forwarder = UpstreamForwarder::new(addr, Duration::from_millis(200));
        let name = Name::from_ascii("nothing.example.").unwrap();

        let started = std::time::Instant::now();
        assert!(forwarder.forward(&name).await.is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timeout_reported_as_forward_error() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let forwarder =
            UpstreamForwarder::new(silent.local_addr().unwrap(), Duration::from_millis(100));
        let name = Name::from_ascii("nothing.example.").unwrap();

        assert!(forwarder.lookup(&name).await.is_err());
    }
}
