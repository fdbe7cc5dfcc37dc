//! Metrics collection and exposition.
//!
//! # Metrics
//! - `autohost_resolutions_total` (counter): attempts by trigger and outcome
//! - `autohost_bindings` (gauge): bindings in the current table
//! - `autohost_alias_registrations_total` (counter): by result
//! - `autohost_connections_total` (counter): accepted control connections
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_resolution(trigger: &'static str, outcome: &'static str) {
    metrics::counter!("autohost_resolutions_total", "trigger" => trigger, "outcome" => outcome).increment(1);
}

pub fn set_binding_count(count: usize) {
    metrics::gauge!("autohost_bindings").set(count as f64);
}

pub fn record_alias_registration(result: &'static str) {
    metrics::counter!("autohost_alias_registrations_total", "result" => result).increment(1);
}

pub fn record_connection() {
    metrics::counter!("autohost_connections_total").increment(1);
}
