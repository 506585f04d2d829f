//! Prometheus metrics handler

use crate::domain::{GatewayError, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| GatewayError::Internal(format!("failed to install metrics recorder: {}", e)))?;

    describe_metrics();
    Ok(handle)
}

/// Register descriptions for the gateway's metrics
pub fn describe_metrics() {
    describe_counter!(
        "gateway_negotiations_total",
        "Offer/answer exchanges by outcome"
    );
    describe_gauge!(
        "gateway_active_connections",
        "Number of currently registered bridged connections"
    );
    describe_counter!(
        "gateway_relay_packets_total",
        "RTP packets forwarded between clients and the room"
    );
    describe_counter!(
        "gateway_relay_dropped_total",
        "RTP packets dropped by the relay (non-owner writers, failed fan-out writes)"
    );
}

/// HTTP metrics handler
pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    let metrics = prometheus_handle.render();
    (StatusCode::OK, metrics).into_response()
}
