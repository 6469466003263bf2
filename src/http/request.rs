//! Request identification.
//!
//! # Responsibilities
//! - Assign an `x-request-id` to requests that arrive without one
//! - Echo it on the response and into the request span
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - A client-supplied ID is kept, not replaced

use axum::http::{HeaderName, Request};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::Span;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Sets `x-request-id` (UUID v4) when missing.
pub fn set_request_id() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Copies the request's `x-request-id` onto the response.
pub fn propagate_request_id() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

pub trait RequestIdExt {
    /// The request ID, or `"unknown"` when none is set.
    fn request_id(&self) -> &str;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> &str {
        self.headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }
}

/// Root span for one request.
pub fn request_span<B>(req: &Request<B>) -> Span {
    tracing::info_span!(
        "request",
        request_id = %req.request_id(),
        method = %req.method(),
        path = %req.uri().path(),
    )
}
