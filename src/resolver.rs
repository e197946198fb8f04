//! Answers A queries from the record store, falling back to upstream.

use hickory_proto::op::Query;
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use std::net::Ipv4Addr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::metrics::{self, QueryResult, Timer};
use crate::state::RecordStore;
use crate::upstream::Upstream;

/// TTL for answers derived from the record store.
pub const DEFAULT_TTL: u32 = 5;

/// A stored address that could not become an answer record.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Stored address is not an IPv4 address.
    #[error("invalid IPv4 address {0:?}")]
    InvalidAddress(String),
}

/// Build an A record owned by `name` pointing at `address`.
///
/// The owner is the question name itself, so the answer keeps the
/// client's spelling and case.
pub fn build_a_record(name: &Name, address: &str, ttl: u32) -> Result<Record, RecordError> {
    let ip: Ipv4Addr = address
        .parse()
        .map_err(|_| RecordError::InvalidAddress(address.to_string()))?;

    let mut record = Record::from_rdata(name.clone(), ttl, RData::A(A(ip)));
    record.set_dns_class(DNSClass::IN);
    Ok(record)
}

/// Resolves queries: exact match, then longest suffix match, then upstream.
pub struct QueryResolver {
    store: RecordStore,
    upstream: Arc<dyn Upstream>,
    ttl: u32,
}

impl QueryResolver {
    /// Create a resolver over `store` that forwards misses to `upstream`.
    pub fn new(store: RecordStore, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            store,
            upstream,
            ttl: DEFAULT_TTL,
        }
    }

    /// Override the TTL of locally derived answers.
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Answer a single question.
    ///
    /// Only `IN A` questions get answers; everything else, and every name no
    /// path resolves, yields an empty answer list.
    pub async fn resolve(&self, query: &Query) -> Vec<Record> {
        let timer = Timer::start();
        let rtype_str = format!("{:?}", query.query_type());

        if query.query_type() != RecordType::A || query.query_class() != DNSClass::IN {
            trace!(name = %query.name(), rtype = ?query.query_type(), "unsupported query type");
            metrics::record_query(&rtype_str, QueryResult::Unsupported, timer.elapsed());
            return Vec::new();
        }

        let name = query.name().to_string();

        let local = match self.store.lookup_exact(&name) {
            Some(address) => Some((address, QueryResult::Exact)),
            None => self
                .store
                .lookup_suffix(&name)
                .map(|address| (address, QueryResult::Suffix)),
        };

        if let Some((address, path)) = local {
            return match build_a_record(query.name(), &address, self.ttl) {
                Ok(record) => {
                    debug!(%name, %address, ?path, "answered locally");
                    metrics::record_query(&rtype_str, path, timer.elapsed());
                    vec![record]
                }
                Err(e) => {
                    warn!(%name, error = %e, "skipping unusable record");
                    metrics::record_query(&rtype_str, QueryResult::InvalidRecord, timer.elapsed());
                    Vec::new()
                }
            };
        }

        match self.upstream.forward(query.name()).await {
            Some(record) => {
                debug!(%name, "answered from upstream");
                metrics::record_query(&rtype_str, QueryResult::Upstream, timer.elapsed());
                vec![record]
            }
            None => {
                debug!(%name, "unresolved");
                metrics::record_query(&rtype_str, QueryResult::Unresolved, timer.elapsed());
                Vec::new()
            }
        }
    }
}
