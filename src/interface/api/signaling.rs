/// HTTP signaling for bridged clients
///
/// A client POSTs its SDP offer as the raw request body and receives the
/// complete answer SDP back. There is no trickle ICE and no follow-up
/// request: one exchange sets up the whole connection.
use crate::application::BridgeService;
use crate::domain::GatewayError;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<BridgeService>,
}

impl AppState {
    pub fn new(bridge: Arc<BridgeService>) -> Self {
        Self { bridge }
    }
}

/// Accept an SDP offer and answer it
pub async fn connect_handler(
    State(state): State<AppState>,
    method: Method,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        return GatewayError::MethodNotAllowed(method.to_string()).into_response();
    }

    let offer = match std::str::from_utf8(&body) {
        Ok(offer) => offer,
        Err(e) => {
            return GatewayError::InvalidOffer(format!("offer is not valid UTF-8: {}", e))
                .into_response()
        }
    };

    match state.bridge.connect(offer).await {
        Ok((connection_id, answer)) => {
            info!("API: Answered offer for connection {}", connection_id);
            (
                StatusCode::CREATED,
                [(header::CONTENT_TYPE, "application/sdp")],
                answer,
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_connections: usize,
}

/// Health check
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.bridge.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        active_connections: state.bridge.registry().len().await,
    })
}
