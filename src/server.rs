//! DNS server setup and lifecycle management.

use hickory_proto::op::{Message, MessageType, OpCode};
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{Config, KubeConfig};
use crate::error::DnsError;
use crate::reconciler::Reconciler;
use crate::resolver::QueryResolver;
use crate::state::RecordStore;
use crate::subscription::SubscriptionHandler;
use crate::upstream::{self, UpstreamForwarder};

/// Interval for emitting store metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Largest datagram accepted.
const MAX_DATAGRAM_SIZE: usize = 4096;

/// Periodically emit store metrics.
async fn metrics_loop(store: RecordStore, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                store.emit_metrics();
                debug!(
                    exact = store.exact_count(),
                    suffix = store.suffix_count(),
                    "emitted store metrics"
                );
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Build the reply to one request datagram.
///
/// Returns `None` for datagrams that are not decodable queries. The reply
/// mirrors the request id, opcode and RD/CD bits, echoes the questions and
/// is encoded without name compression.
pub async fn handle_datagram(packet: &[u8], resolver: &QueryResolver) -> Option<Vec<u8>> {
    let request = match Message::from_vec(packet) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "dropping undecodable datagram");
            return None;
        }
    };

    if request.message_type() != MessageType::Query {
        debug!(id = request.id(), "dropping datagram that is not a query");
        return None;
    }

    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(request.op_code());
    response.set_recursion_desired(request.recursion_desired());
    response.set_checking_disabled(request.checking_disabled());
    response.add_queries(request.queries().iter().cloned());

    if request.op_code() == OpCode::Query {
        for query in request.queries() {
            response.add_answers(resolver.resolve(query).await);
        }
    }

    match encode_uncompressed(&response) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(id = request.id(), error = %e, "failed to encode response");
            None
        }
    }
}

/// Encode `message` with every name written out in full.
///
/// Owner names keep the case they carry. Only the header, questions and
/// answers are written; replies never carry other sections.
pub fn encode_uncompressed(message: &Message) -> Result<Vec<u8>, DnsError> {
    let mut header = *message.header();
    header
        .set_query_count(section_len(message.queries().len())?)
        .set_answer_count(section_len(message.answers().len())?)
        .set_name_server_count(0)
        .set_additional_count(0);

    let mut bytes = Vec::with_capacity(512);
    let mut encoder = BinEncoder::new(&mut bytes);
    header.emit(&mut encoder)?;

    for query in message.queries() {
        query.name().emit_as_canonical(&mut encoder, true)?;
        encoder.emit_u16(u16::from(query.query_type()))?;
        encoder.emit_u16(u16::from(query.query_class()))?;
    }

    for record in message.answers() {
        record.name().emit_as_canonical(&mut encoder, true)?;
        encoder.emit_u16(u16::from(record.record_type()))?;
        encoder.emit_u16(u16::from(record.dns_class()))?;
        encoder.emit_u32(record.ttl())?;

        let place = encoder.place::<u16>()?;
        encoder.set_canonical_names(true);
        record.data().emit(&mut encoder)?;
        encoder.set_canonical_names(false);
        let len = encoder.len_since_place(&place);
        place.replace(&mut encoder, section_len(len)?)?;
    }

    Ok(bytes)
}

fn section_len(len: usize) -> Result<u16, DnsError> {
    u16::try_from(len).map_err(|_| {
        DnsError::Proto(hickory_proto::ProtoError::from(format!(
            "section length {len} does not fit in u16"
        )))
    })
}

/// Answer queries arriving on `socket` until `shutdown` fires.
///
/// Every datagram is handled in its own task; tasks still running at
/// shutdown are aborted.
pub async fn serve_udp(
    socket: UdpSocket,
    resolver: Arc<QueryResolver>,
    shutdown: CancellationToken,
) -> Result<(), DnsError> {
    let socket = Arc::new(socket);
    let mut in_flight = JoinSet::new();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!(in_flight = in_flight.len(), "UDP listener shutting down");
                break;
            }

            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!("query task failed: {}", e);
                }
            }

            received = socket.recv_from(&mut buf) => {
                let (len, src) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "UDP receive failed");
                        continue;
                    }
                };

                let packet = buf[..len].to_vec();
                let socket = socket.clone();
                let resolver = resolver.clone();
                in_flight.spawn(async move {
                    let Some(reply) = handle_datagram(&packet, &resolver).await else {
                        return;
                    };
                    if let Err(e) = socket.send_to(&reply, src).await {
                        debug!(%src, error = %e, "failed to send response");
                    } else {
                        trace!(%src, bytes = reply.len(), "sent response");
                    }
                });
            }
        }
    }

    in_flight.abort_all();
    Ok(())
}

/// Connect to the Kubernetes API.
async fn kube_client(config: &KubeConfig) -> Result<Client, DnsError> {
    if config.development {
        #[cfg(feature = "development")]
        return development_client(config);

        #[cfg(not(feature = "development"))]
        warn!("development mode requested but not compiled in; using default credentials");
    }

    Ok(Client::try_default().await?)
}

/// Client talking to a local API proxy, e.g. `kubectl proxy`.
#[cfg(feature = "development")]
fn development_client(config: &KubeConfig) -> Result<Client, DnsError> {
    let url: http::Uri = config.development_api_url.parse().map_err(|e| {
        DnsError::Config(format!(
            "invalid development API URL {:?}: {}",
            config.development_api_url, e
        ))
    })?;

    warn!(api_url = %url, "DEVELOPMENT MODE: skipping in-cluster credentials");

    let mut kube_config = kube::Config::new(url);
    kube_config.accept_invalid_certs = true;
    if let Some(token) = &config.development_token {
        kube_config.auth_info.token = Some(token.clone().into());
    }

    Ok(Client::try_from(kube_config)?)
}

/// DNS server backed by annotated cluster resources.
pub struct DnsServer {
    config: Config,
    store: RecordStore,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: RecordStore::new(),
        }
    }

    /// Get a reference to the record store.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Run the DNS server until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DnsError> {
        let listen_addr = self.config.dns.listen_addr();
        info!(%listen_addr, "Starting disco DNS server");

        let client = kube_client(&self.config.kube).await?;

        let upstream_addr = match self.config.dns.upstream_addr {
            Some(addr) => addr,
            None => {
                upstream::discover_cluster_resolver(
                    client.clone(),
                    &self.config.kube.dns_service_namespace,
                    &self.config.kube.dns_service_name,
                )
                .await?
            }
        };
        let forwarder =
            UpstreamForwarder::new(upstream_addr, self.config.dns.upstream_timeout());
        info!(upstream = %forwarder.addr(), "forwarding unmatched queries");

        // Start the watches
        let subscriptions = SubscriptionHandler::new(client, Reconciler::new(self.store.clone()));
        let sub_shutdown = shutdown.clone();
        let sub_handle = tokio::spawn(async move { subscriptions.run(sub_shutdown).await });

        // Wait for initial sync before answering
        info!("Waiting for initial pod and service listing...");
        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested before initial sync completed");
                let _ = sub_handle.await;
                return Ok(());
            }

            if self.store.is_ready() {
                info!(
                    exact = self.store.exact_count(),
                    suffix = self.store.suffix_count(),
                    "Initial sync complete"
                );
                break;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let socket = match UdpSocket::bind(listen_addr).await {
            Ok(socket) => socket,
            Err(e) => {
                error!(%listen_addr, "Failed to start server: {}", e);
                shutdown.cancel();
                let _ = sub_handle.await;
                return Err(e.into());
            }
        };
        info!(addr = %listen_addr, "DNS UDP listening");

        let resolver = Arc::new(
            QueryResolver::new(self.store.clone(), Arc::new(forwarder))
                .with_ttl(self.config.dns.ttl),
        );

        let metrics_handle = tokio::spawn(metrics_loop(self.store.clone(), shutdown.clone()));
        self.store.emit_metrics();

        let result = serve_udp(socket, resolver, shutdown.clone()).await;

        let _ = metrics_handle.await;

        info!("Waiting for watches to stop...");
        let _ = sub_handle.await;

        info!("DNS server stopped");
        result
    }
}
