//! In-memory record store fed by the reconciler.
//!
//! Two tables live behind one lock:
//! - exact: `domain -> address`, written for every record
//! - suffix: `domain -> address`, written for service records only
//!
//! A suffix entry matches any query name that ends with its domain. When
//! several entries match, the longest domain wins.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::metrics;
use crate::resource::ResourceKind;

/// Thread-safe store of derived domain records.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    inner: Arc<RwLock<RecordStoreInner>>,
}

#[derive(Debug, Default)]
struct RecordStoreInner {
    /// domain -> address
    exact: HashMap<String, String>,

    /// domain suffix -> address (services only)
    suffix: HashMap<String, String>,

    /// True after the initial instance listing completed
    instances_ready: bool,

    /// True after the initial service listing completed
    services_ready: bool,
}

impl RecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for `domain`.
    pub fn upsert(&self, domain: &str, address: &str, kind: ResourceKind) {
        let mut inner = self.inner.write();
        debug!(domain, address, %kind, "upserting record");
        inner.exact.insert(domain.to_string(), address.to_string());
        if kind == ResourceKind::Service {
            inner.suffix.insert(domain.to_string(), address.to_string());
        }
    }

    /// Remove the record for `domain`. Unknown domains are ignored.
    pub fn remove(&self, domain: &str, kind: ResourceKind) {
        let mut inner = self.inner.write();
        let mut removed = inner.exact.remove(domain).is_some();
        if kind == ResourceKind::Service {
            removed |= inner.suffix.remove(domain).is_some();
        }
        if removed {
            debug!(domain, %kind, "removed record");
        }
    }

    /// Address stored under exactly `name`.
    pub fn lookup_exact(&self, name: &str) -> Option<String> {
        self.inner.read().exact.get(name).cloned()
    }

    /// Address of the longest suffix entry that `name` ends with.
    pub fn lookup_suffix(&self, name: &str) -> Option<String> {
        let inner = self.inner.read();
        inner
            .suffix
            .iter()
            .filter(|(domain, _)| name.ends_with(domain.as_str()))
            .max_by_key(|(domain, _)| domain.len())
            .map(|(_, address)| address.clone())
    }

    /// Check whether the initial listing of both kinds has completed.
    pub fn is_ready(&self) -> bool {
        let inner = self.inner.read();
        inner.instances_ready && inner.services_ready
    }

    /// Mark the initial listing of `kind` as complete.
    pub fn mark_ready(&self, kind: ResourceKind) {
        let mut inner = self.inner.write();
        match kind {
            ResourceKind::Instance => inner.instances_ready = true,
            ResourceKind::Service => inner.services_ready = true,
        }
        debug!(
            instances_ready = inner.instances_ready,
            services_ready = inner.services_ready,
            "{} feed ready",
            kind
        );
    }

    /// Number of exact-match records.
    pub fn exact_count(&self) -> usize {
        self.inner.read().exact.len()
    }

    /// Number of suffix-match records.
    pub fn suffix_count(&self) -> usize {
        self.inner.read().suffix.len()
    }

    /// Emit current store metrics.
    pub fn emit_metrics(&self) {
        let inner = self.inner.read();
        metrics::record_store_counts(inner.exact.len(), inner.suffix.len());
        metrics::record_ready_state(inner.instances_ready, inner.services_ready);
    }
}
