//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, compression, sessions, rotation, cron)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_compressed_responses_total` (counter): responses by encoding
//! - `gateway_session_saves_total` (counter): session saves by store, result
//! - `gateway_log_rotations_total` (counter): rotated log segments
//! - `gateway_cron_runs_total` (counter): cron ticks by result (ok, skipped, panic)
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library code and
//!   tests never need a running exporter

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_compressed(encoding: &'static str) {
    metrics::counter!("gateway_compressed_responses_total", "encoding" => encoding).increment(1);
}

pub fn record_session_save(store: &'static str, result: &'static str) {
    metrics::counter!("gateway_session_saves_total", "store" => store, "result" => result).increment(1);
}

pub fn record_log_rotation() {
    metrics::counter!("gateway_log_rotations_total").increment(1);
}

pub fn record_cron_run(result: &'static str) {
    metrics::counter!("gateway_cron_runs_total", "result" => result).increment(1);
}
