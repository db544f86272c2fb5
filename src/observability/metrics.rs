//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, pending replies, fan-out, auth)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, service
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_pending_requests` (gauge): requests waiting for a reply
//! - `gateway_fanout_failures_total` (counter): failed secondary copies by service
//! - `gateway_auth_total` (counter): auth calls by outcome
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed (tests need no setup)
//! - Labels for method, service, status code

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, service: &str, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "service" => service.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn set_pending_requests(count: usize) {
    metrics::gauge!("gateway_pending_requests").set(count as f64);
}

pub fn record_fanout_failure(service: &str) {
    metrics::counter!("gateway_fanout_failures_total", "service" => service.to_string()).increment(1);
}

pub fn record_auth(outcome: &'static str) {
    metrics::counter!("gateway_auth_total", "outcome" => outcome).increment(1);
}
