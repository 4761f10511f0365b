//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (requests, latency, rejections, cache, connections)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `microweb_requests_total` (counter): requests by method, status
//! - `microweb_request_duration_seconds` (histogram): latency distribution
//! - `microweb_rejected_total` (counter): work refused, by reason
//! - `microweb_cache_lookups_total` (counter): hit / negative / miss
//! - `microweb_cache_entries`, `microweb_cache_bytes` (gauges)
//! - `microweb_cache_evictions_total` (counter)
//! - `microweb_active_connections` (gauge): current connection count
//!
//! # Design Decisions
//! - Low-overhead metric updates through the `metrics` facade
//! - Without an installed recorder every call is a no-op

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "microweb_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("microweb_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rejected(reason: &'static str) {
    counter!("microweb_rejected_total", "reason" => reason).increment(1);
}

pub fn record_cache_lookup(result: &'static str) {
    counter!("microweb_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize, bytes: usize) {
    gauge!("microweb_cache_entries").set(entries as f64);
    gauge!("microweb_cache_bytes").set(bytes as f64);
}

pub fn record_cache_evictions(count: usize) {
    counter!("microweb_cache_evictions_total").increment(count as u64);
}

pub fn record_active_connections(count: usize) {
    gauge!("microweb_active_connections").set(count as f64);
}
