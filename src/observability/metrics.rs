//! Metrics collection and exposition.
//!
//! # Metrics
//! - `endpoint_sync_passes_total` (counter): sync passes by result
//! - `endpoint_sync_duration_seconds` (histogram): pass latency
//! - `endpoint_sync_backend_servers` (gauge): servers in the last committed pass
//! - `endpoint_sync_requeues_total` (counter): rate-limited retries
//! - `dataplane_requests_total` (counter): Data Plane API calls by method, status

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_sync(success: bool, started: Instant) {
    let result = if success { "success" } else { "failure" };
    counter!("endpoint_sync_passes_total", "result" => result).increment(1);
    histogram!("endpoint_sync_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_backend_servers(count: usize) {
    gauge!("endpoint_sync_backend_servers").set(count as f64);
}

pub fn record_requeue() {
    counter!("endpoint_sync_requeues_total").increment(1);
}

/// `status` 0 means no response was received.
pub fn record_dataplane_request(method: &str, status: u16) {
    counter!(
        "dataplane_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
