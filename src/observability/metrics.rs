//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define endpoint metrics (accepts, accept errors, live connections, routing)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `endpoint_connections_accepted_total` (counter): accepted sockets by endpoint
//! - `endpoint_accept_errors_total` (counter): accept failures by endpoint, kind
//! - `endpoint_live_connections` (gauge): open connections by endpoint
//! - `endpoint_routes_total` (counter): routing outcomes (bound, not_found)
//! - `endpoint_prefixes` (gauge): registered prefixes by endpoint
//! - `endpoint_cas_retries_total` (counter): routing table swap conflicts
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with an HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_accept(endpoint: &str) {
    metrics::counter!("endpoint_connections_accepted_total", "endpoint" => endpoint.to_string()).increment(1);
}

/// `kind` is `reset` for connection-reset completions, `other` otherwise.
pub fn record_accept_error(endpoint: &str, kind: &'static str) {
    metrics::counter!(
        "endpoint_accept_errors_total",
        "endpoint" => endpoint.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_live_connections(endpoint: &str, count: u64) {
    metrics::gauge!("endpoint_live_connections", "endpoint" => endpoint.to_string()).set(count as f64);
}

/// `outcome` is `bound` or `not_found`.
pub fn record_route(outcome: &'static str) {
    metrics::counter!("endpoint_routes_total", "outcome" => outcome).increment(1);
}

pub fn record_prefix_count(endpoint: &str, count: usize) {
    metrics::gauge!("endpoint_prefixes", "endpoint" => endpoint.to_string()).set(count as f64);
}

pub fn record_cas_retry() {
    metrics::counter!("endpoint_cas_retries_total").increment(1);
}
