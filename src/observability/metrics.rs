//! Metrics collection and exposition.
//!
//! # Metrics
//! - `policy_kernel_streams_total` (counter): finished streams by outcome
//! - `policy_kernel_active_streams` (gauge): streams currently open
//! - `policy_kernel_phase_total` (counter): executed phases by phase, outcome
//! - `policy_kernel_phase_duration_seconds` (histogram): chain execution time per phase
//! - `policy_kernel_route_misses_total` (counter): request headers with no chain
//! - `policy_kernel_policy_errors_total` (counter): masked execution failures by phase
//! - `policy_kernel_config_reloads_total` (counter): config applications by outcome
//! - `policy_kernel_routes` (gauge): routes in the live table
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade, a no-op until an exporter is installed
//! - The Prometheus exporter serves its own scrape endpoint

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::extproc::types::Phase;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn stream_opened() {
    ::metrics::gauge!("policy_kernel_active_streams").increment(1.0);
}

pub fn stream_closed(outcome: &'static str) {
    ::metrics::gauge!("policy_kernel_active_streams").decrement(1.0);
    ::metrics::counter!("policy_kernel_streams_total", "outcome" => outcome).increment(1);
}

pub fn record_phase(phase: Phase, outcome: &'static str, started: Instant) {
    ::metrics::counter!(
        "policy_kernel_phase_total",
        "phase" => phase.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!("policy_kernel_phase_duration_seconds", "phase" => phase.as_str())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_route_miss() {
    ::metrics::counter!("policy_kernel_route_misses_total").increment(1);
}

pub fn record_policy_error(phase: Phase) {
    ::metrics::counter!("policy_kernel_policy_errors_total", "phase" => phase.as_str()).increment(1);
}

pub fn record_config_reload(outcome: &'static str) {
    ::metrics::counter!("policy_kernel_config_reloads_total", "outcome" => outcome).increment(1);
}

pub fn set_route_count(count: usize) {
    ::metrics::gauge!("policy_kernel_routes").set(count as f64);
}
