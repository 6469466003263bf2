//! Request-path errors and their translation into HTTP responses.

use axum::{
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::session::SessionError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Loading the session failed.
    #[error("session unavailable: {0}")]
    Session(#[from] SessionError),

    #[error("session save failed: {0}")]
    SessionSave(SessionError),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Session(SessionError::Snapshot(_)) | GatewayError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Session(_) | GatewayError::SessionSave(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Session(_) => "SESSION_UNAVAILABLE",
            GatewayError::SessionSave(_) => "SESSION_SAVE_FAILED",
            GatewayError::Upstream(_) => "UPSTREAM_ERROR",
            GatewayError::InvalidRequest(_) => "INVALID_REQUEST",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Owns status-code translation and body rendering for middleware errors.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, method: &Method, uri: &Uri, err: &GatewayError) -> Response;
}

/// Logs the failure and renders it as a JSON error body.
#[derive(Debug, Default, Clone)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, method: &Method, uri: &Uri, err: &GatewayError) -> Response {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(method = %method, uri = %uri, error = %err, "Request failed");
        } else {
            tracing::debug!(method = %method, uri = %uri, error = %err, "Request rejected");
        }
        let body = Json(json!({
            "error": {
                "code": err.code(),
                "message": err.to_string(),
            }
        }));
        (status, body).into_response()
    }
}
