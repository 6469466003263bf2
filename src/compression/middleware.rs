//! Compression middleware.
//!
//! The compress/skip decision is made once, from the response head, before
//! any body byte is forwarded. A response is compressed only when all of:
//! - the client accepts `br` or `gzip`
//! - the request is not `HEAD` and the status carries a body
//! - `Content-Length` is present and at least the minimum size
//! - the media type is whitelisted
//! - there is no compressive `Content-Encoding` and no `Content-Range`

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::compression::body::CompressionBody;
use crate::compression::encoder::Encoding;
use crate::compression::pool::EncoderPools;
use crate::config::CompressionConfig;
use crate::observability::metrics;

/// Codings that mark a body as already compressed.
const COMPRESSIVE_ENCODINGS: &[&str] = &["gzip", "br", "deflate", "compress", "zstd"];

/// State shared by every request passing through the compression layer.
#[derive(Clone)]
pub struct CompressionState {
    pools: EncoderPools,
    minimum_size: u64,
    target_mimes: Arc<HashSet<String>>,
}

impl CompressionState {
    pub fn new(config: &CompressionConfig) -> Self {
        Self {
            pools: EncoderPools::new(config.gzip_level, config.brotli_level),
            minimum_size: config.minimum_size_bytes,
            target_mimes: Arc::new(
                config
                    .target_mimes
                    .iter()
                    .map(|m| m.trim().to_ascii_lowercase())
                    .collect(),
            ),
        }
    }

    /// Whether a response with this head should be compressed.
    pub fn should_compress(&self, status: StatusCode, headers: &HeaderMap) -> bool {
        if status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
            return false;
        }
        if headers.contains_key(header::CONTENT_RANGE) {
            return false;
        }

        let Some(length) = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
        else {
            return false;
        };
        if length < self.minimum_size {
            return false;
        }

        match headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            Some(content_type) if self.target_mimes.contains(&media_type(content_type)) => {}
            _ => return false,
        }

        !already_encoded(headers)
    }
}

/// `text/html; charset=utf-8` → `text/html`.
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn already_encoded(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CONTENT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .any(|token| COMPRESSIVE_ENCODINGS.contains(&token.as_str()))
}

fn vary_has_accept_encoding(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| {
            let token = token.trim();
            token == "*" || token.eq_ignore_ascii_case("accept-encoding")
        })
}

/// Rewrite the response head for a body encoded with `encoding`.
fn mark_encoded(headers: &mut HeaderMap, encoding: Encoding) {
    headers.append(header::CONTENT_ENCODING, HeaderValue::from_static(encoding.as_str()));
    if !vary_has_accept_encoding(headers) {
        headers.append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    }
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::ACCEPT_RANGES);
}

pub async fn compression_middleware(
    State(state): State<CompressionState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let encoding = req
        .headers()
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .and_then(Encoding::negotiate);
    let is_head = req.method() == Method::HEAD;

    let response = next.run(req).await;

    let Some(encoding) = encoding else {
        return response;
    };
    if is_head || !state.should_compress(response.status(), response.headers()) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    mark_encoded(&mut parts.headers, encoding);
    let encoder = state.pools.get(encoding).acquire();
    metrics::record_compressed(encoding.as_str());
    tracing::trace!(encoding = %encoding, "Compressing response");

    Response::from_parts(parts, Body::new(CompressionBody::new(body, encoder)))
}
