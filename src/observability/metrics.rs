//! Metrics collection and exposition.
//!
//! # Metrics
//! - `pipeline_admitted_total` (counter): exchanges admitted
//! - `pipeline_rejected_total` (counter): requests rejected, by reason
//! - `pipeline_in_flight` (gauge): in-flight exchanges across all connections
//! - `pipeline_exchanges_total` (counter): settled exchanges, by outcome
//! - `pipeline_connections_closed_total` (counter): closes, by reason
//!
//! Without an installed recorder every call is a no-op.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

use crate::error::CloseReason;

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_admitted() {
    ::metrics::counter!("pipeline_admitted_total").increment(1);
}

/// `reason` is one of `limit_exceeded`, `closing`, `closed`.
pub fn record_rejected(reason: &'static str) {
    ::metrics::counter!("pipeline_rejected_total", "reason" => reason).increment(1);
}

/// A slot was taken on some connection.
pub fn record_slot_taken() {
    ::metrics::gauge!("pipeline_in_flight").increment(1.0);
}

/// A slot was given back on some connection.
pub fn record_slot_released() {
    ::metrics::gauge!("pipeline_in_flight").decrement(1.0);
}

pub fn record_exchange(outcome: &'static str) {
    ::metrics::counter!("pipeline_exchanges_total", "outcome" => outcome).increment(1);
}

pub fn record_connection_closed(reason: CloseReason) {
    ::metrics::counter!("pipeline_connections_closed_total", "reason" => reason.label())
        .increment(1);
}
