//! Shared test infrastructure for disco integration tests.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use parking_lot::Mutex;
use serde_json::json;

use disco_dns::resolver::QueryResolver;
use disco_dns::resource::{ResourceKind, Snapshot};
use disco_dns::state::RecordStore;
use disco_dns::upstream::Upstream;

// --- Upstream stub ---

/// Upstream that answers a fixed set of names and remembers every question.
#[derive(Default)]
pub struct StubUpstream {
    answers: Mutex<Vec<(String, Ipv4Addr, u32)>>,
    asked: Mutex<Vec<String>>,
}

impl StubUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer `name` with `ip` and `ttl`.
    pub fn answer(&self, name: &str, ip: Ipv4Addr, ttl: u32) {
        self.answers.lock().push((name.to_string(), ip, ttl));
    }

    /// Names forwarded so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().clone()
    }
}

#[async_trait]
impl Upstream for StubUpstream {
    async fn forward(&self, name: &Name) -> Option<Record> {
        let name_str = name.to_string();
        self.asked.lock().push(name_str.clone());
        self.answers
            .lock()
            .iter()
            .find(|(n, _, _)| *n == name_str)
            .map(|(n, ip, ttl)| {
                Record::from_rdata(Name::from_ascii(n).unwrap(), *ttl, RData::A(A(*ip)))
            })
    }
}

// --- Snapshot builders ---

/// Build a snapshot the way the feed adapter would for a pod or service.
pub fn snapshot(
    kind: ResourceKind,
    name: &str,
    namespace: &str,
    address: &str,
    annotation: Option<&str>,
    deleting: bool,
) -> Snapshot {
    Snapshot {
        kind,
        name: name.to_string(),
        namespace: namespace.to_string(),
        address: address.to_string(),
        deleting,
        annotation: annotation.map(String::from),
        fields: json!({
            "metadata": {
                "name": name,
                "namespace": namespace,
                "annotations": { "disco.min.io": annotation },
            },
            "status": { "podIP": address },
        }),
    }
}

pub fn pod(name: &str, address: &str, annotation: &str) -> Snapshot {
    snapshot(ResourceKind::Instance, name, "default", address, Some(annotation), false)
}

pub fn service(name: &str, namespace: &str, address: &str, annotation: &str) -> Snapshot {
    snapshot(ResourceKind::Service, name, namespace, address, Some(annotation), false)
}

// --- Query helpers ---

pub fn build_resolver(store: RecordStore, upstream: Arc<StubUpstream>) -> QueryResolver {
    QueryResolver::new(store, upstream)
}

pub fn a_query(name: &str) -> Query {
    Query::query(Name::from_ascii(name).unwrap(), RecordType::A)
}

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Extract A addresses from answer records.
pub fn a_ips(records: &[Record]) -> Vec<Ipv4Addr> {
    records
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(a.0),
            _ => None,
        })
        .collect()
}
