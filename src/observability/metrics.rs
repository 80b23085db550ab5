//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cds_config_updates_total` (counter): store mutations by `op`
//! - `cds_configs` (gauge): configs currently stored
//! - `cds_subscriptions` (gauge): live subscriptions
//! - `cds_active_connections` (gauge): open watch websockets on the server
//! - `cds_client_reconnects_total` (counter): client reconnect attempts

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_config_update(op: &'static str) {
    ::metrics::counter!("cds_config_updates_total", "op" => op).increment(1);
}

pub fn record_config_count(count: usize) {
    ::metrics::gauge!("cds_configs").set(count as f64);
}

pub fn record_subscription_count(count: usize) {
    ::metrics::gauge!("cds_subscriptions").set(count as f64);
}

pub fn record_connection_count(count: usize) {
    ::metrics::gauge!("cds_active_connections").set(count as f64);
}

pub fn record_client_reconnect(topic: &str) {
    ::metrics::counter!("cds_client_reconnects_total", "topic" => topic.to_string()).increment(1);
}
