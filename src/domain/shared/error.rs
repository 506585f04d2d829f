//! Gateway errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Invalid offer: {0}")]
    InvalidOffer(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Request canceled: gateway is shutting down")]
    ShutdownCanceled,

    #[error("{0} is required")]
    MissingFlag(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Token error: {0}")]
    Token(String),

    #[error("Room link error: {0}")]
    Room(String),
}

impl GatewayError {
    /// HTTP status the signaling surface reports for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::InvalidOffer(_) | GatewayError::Negotiation(_) => StatusCode::BAD_REQUEST,
            GatewayError::ShutdownCanceled => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_)
            | GatewayError::MissingFlag(_)
            | GatewayError::Config(_)
            | GatewayError::Token(_)
            | GatewayError::Room(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<webrtc::Error> for GatewayError {
    fn from(err: webrtc::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("API: {}", self);
        } else {
            warn!("API: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::MethodNotAllowed("GET".into()).status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            GatewayError::InvalidOffer("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Negotiation("ice timeout".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::ShutdownCanceled.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_flag_message() {
        assert_eq!(GatewayError::MissingFlag("api-key").to_string(), "api-key is required");
    }
}
