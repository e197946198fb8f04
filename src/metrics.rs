//! Metrics instrumentation for disco.
//!
//! All metrics are prefixed with `disco.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record an answered DNS question.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Exact => "exact",
        QueryResult::Suffix => "suffix",
        QueryResult::Upstream => "upstream",
        QueryResult::Unresolved => "unresolved",
        QueryResult::Unsupported => "unsupported",
        QueryResult::InvalidRecord => "invalid_record",
    };

    counter!("disco.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("disco.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// How a question was (or was not) answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    /// Exact record match.
    Exact,
    /// Longest suffix record match.
    Suffix,
    /// Answer passed through from upstream.
    Upstream,
    /// No path produced an answer.
    Unresolved,
    /// Not an `IN A` question.
    Unsupported,
    /// A stored record could not be turned into an answer.
    InvalidRecord,
}

/// Record a failed upstream forward.
pub fn record_forward_failure(reason: ForwardFailure) {
    let reason_str = match reason {
        ForwardFailure::Timeout => "timeout",
        ForwardFailure::Error => "error",
    };

    counter!("disco.upstream.failure.count", "reason" => reason_str).increment(1);
}

/// Upstream failure reasons.
#[derive(Debug, Clone, Copy)]
pub enum ForwardFailure {
    /// Upstream did not answer in time.
    Timeout,
    /// Upstream errored or was unreachable.
    Error,
}

/// Record a lifecycle event received for `kind`.
pub fn record_reconcile_event(kind: &str, event: &str) {
    counter!("disco.reconcile.event.count", "kind" => kind.to_string(), "event" => event.to_string())
        .increment(1);
}

/// Record a store mutation performed by the reconciler.
pub fn record_transition(kind: &str, action: &'static str) {
    counter!("disco.reconcile.transition.count", "kind" => kind.to_string(), "action" => action)
        .increment(1);
}

/// Record a watch stream error for `kind`.
pub fn record_watch_error(kind: &str) {
    counter!("disco.feed.error.count", "kind" => kind.to_string()).increment(1);
}

/// Record a full relist of `kind`.
pub fn record_resync(kind: &str) {
    counter!("disco.feed.resync.count", "kind" => kind.to_string()).increment(1);
}

/// Record record store sizes.
pub fn record_store_counts(exact: usize, suffix: usize) {
    gauge!("disco.store.exact.count").set(exact as f64);
    gauge!("disco.store.suffix.count").set(suffix as f64);
}

/// Record feed readiness.
pub fn record_ready_state(instances_ready: bool, services_ready: bool) {
    gauge!("disco.feed.instances_ready").set(if instances_ready { 1.0 } else { 0.0 });
    gauge!("disco.feed.services_ready").set(if services_ready { 1.0 } else { 0.0 });
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
