//! Metrics instrumentation for k8s-gateway-dns.
//!
//! All metrics are prefixed with `k8s_gateway.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Success => "success",
        QueryResult::NxDomain => "nxdomain",
        QueryResult::NoData => "nodata",
        QueryResult::FallThrough => "fallthrough",
        QueryResult::NotReady => "not_ready",
    };

    counter!("k8s_gateway.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("k8s_gateway.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy)]
pub enum QueryResult {
    /// Query returned records successfully.
    Success,
    /// Name not found.
    NxDomain,
    /// Name exists but holds no records of the queried type.
    NoData,
    /// Query handed to the next authority in the chain.
    FallThrough,
    /// Indexes not ready (initial sync incomplete).
    NotReady,
}

/// Record a watch event applied to an index.
pub fn record_watch_event(kind: &str, event: &'static str) {
    counter!("k8s_gateway.watch.event.count", "kind" => kind.to_string(), "event" => event)
        .increment(1);
}

/// Record a watch stream error.
pub fn record_watch_error(kind: &str) {
    counter!("k8s_gateway.watch.error.count", "kind" => kind.to_string()).increment(1);
}

/// Record the size of one kind's index.
pub fn record_index_size(kind: &str, objects: usize, keys: usize) {
    gauge!("k8s_gateway.index.objects.count", "kind" => kind.to_string()).set(objects as f64);
    gauge!("k8s_gateway.index.keys.count", "kind" => kind.to_string()).set(keys as f64);
}

/// Record readiness state.
pub fn record_ready(ready: bool) {
    gauge!("k8s_gateway.ready").set(if ready { 1.0 } else { 0.0 });
}

/// Record IPs returned for a successful A lookup.
pub fn record_ips_returned(count: usize) {
    histogram!("k8s_gateway.query.a.ips_returned").record(count as f64);
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
