//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ws_connections_total` (counter): connections that reached registration
//! - `ws_connections_rejected_total` (counter): refused by the prepare hook
//! - `ws_active_connections` (gauge): current registry size
//! - `ws_frames_received_total` (counter): inbound frames, by routed type
//! - `ws_unknown_type_total` (counter): frames answered with an error envelope
//! - `ws_handler_errors_total` (counter): handler failures, by type
//! - `ws_broadcast_deliveries_total` (counter): broadcast writes, by outcome

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened() {
    counter!("ws_connections_total").increment(1);
}

pub fn record_connection_rejected() {
    counter!("ws_connections_rejected_total").increment(1);
}

pub fn record_active_connections(count: usize) {
    gauge!("ws_active_connections").set(count as f64);
}

pub fn record_frame(msg_type: &str) {
    counter!("ws_frames_received_total", "type" => msg_type.to_owned()).increment(1);
}

pub fn record_unknown_type() {
    counter!("ws_unknown_type_total").increment(1);
}

pub fn record_handler_error(msg_type: &str) {
    counter!("ws_handler_errors_total", "type" => msg_type.to_owned()).increment(1);
}

pub fn record_broadcast(delivered: usize, failed: usize) {
    counter!("ws_broadcast_deliveries_total", "outcome" => "delivered").increment(delivered as u64);
    counter!("ws_broadcast_deliveries_total", "outcome" => "failed").increment(failed as u64);
}
