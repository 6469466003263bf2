//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router and wire the middleware chain
//! - Forward requests to the upstream, running the session pre-proxy hook first
//! - Swap the upstream target when a new config is published
//! - Serve until the shutdown coordinator fires
//!
//! # Middleware order (outermost first)
//! ```text
//! set request-id → propagate request-id → trace → timeout
//!     → session → compression → proxy_handler
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, Uri},
    middleware::from_fn_with_state,
    response::Response,
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use url::Url;

use crate::compression::{compression_middleware, CompressionState};
use crate::config::GatewayConfig;
use crate::errors::{DefaultErrorHandler, ErrorHandler, GatewayError};
use crate::http::request::{propagate_request_id, request_span, set_request_id, RequestIdExt};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::session::{self, session_middleware, KeyValueStore, MemoryKvs, PreProxyHook, SessionError, SessionState};

/// Connection-level headers that must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid upstream url: {0}")]
    Upstream(#[from] url::ParseError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<ArcSwap<Url>>,
    pub client: Client<HttpConnector, Body>,
    pub errors: Arc<dyn ErrorHandler>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    upstream: Arc<ArcSwap<Url>>,
}

impl HttpServer {
    /// Build the server with an in-process KV backing the `kv` session store.
    pub fn new(config: &GatewayConfig) -> Result<Self, ServerError> {
        Self::with_kvs(config, Arc::new(MemoryKvs::new()))
    }

    pub fn with_kvs(config: &GatewayConfig, kvs: Arc<dyn KeyValueStore>) -> Result<Self, ServerError> {
        let upstream = Arc::new(ArcSwap::from_pointee(Url::parse(&config.upstream.url)?));
        let errors: Arc<dyn ErrorHandler> = Arc::new(DefaultErrorHandler);

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let session = if config.session.enabled {
            let store = session::build_store(&config.session, kvs)?;
            Some(SessionState::new(store, errors.clone()))
        } else {
            None
        };

        let state = AppState {
            upstream: upstream.clone(),
            client,
            errors,
        };
        let router = Self::build_router(config, state, session);
        Ok(Self { router, upstream })
    }

    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState, session: Option<SessionState>) -> Router {
        let mut router = Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state);

        if config.compression.enabled {
            let compression = CompressionState::new(&config.compression);
            router = router.layer(from_fn_with_state(compression, compression_middleware));
        }
        if let Some(session) = session {
            router = router.layer(from_fn_with_state(session, session_middleware));
        }

        router
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http().make_span_with(request_span::<Body>))
            .layer(propagate_request_id())
            .layer(set_request_id())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn upstream(&self) -> Arc<ArcSwap<Url>> {
        self.upstream.clone()
    }

    /// Serve on `listener` until `shutdown` fires. Configs received on
    /// `updates` retarget the upstream without a restart.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: Shutdown,
        updates: Option<mpsc::UnboundedReceiver<GatewayConfig>>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, upstream = %self.upstream.load().as_str(), "HTTP server starting");

        if let Some(updates) = updates {
            tokio::spawn(watch_updates(self.upstream.clone(), updates, shutdown.clone()));
        }

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn watch_updates(
    upstream: Arc<ArcSwap<Url>>,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    shutdown: Shutdown,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => {
                    apply_upstream(&upstream, &config);
                }
                None => break,
            },
            _ = shutdown.wait() => break,
        }
    }
}

/// Point `upstream` at the URL in `config`. Returns whether it changed.
pub fn apply_upstream(upstream: &ArcSwap<Url>, config: &GatewayConfig) -> bool {
    let url = match Url::parse(&config.upstream.url) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(url = %config.upstream.url, error = %e, "Ignoring invalid upstream in reloaded config");
            return false;
        }
    };
    if **upstream.load() == url {
        return false;
    }
    tracing::info!(from = %upstream.load().as_str(), to = %url, "Upstream target changed");
    upstream.store(Arc::new(url));
    true
}

/// Join the upstream base with the request's path and query.
fn upstream_uri(base: &Url, uri: &Uri) -> Result<Uri, GatewayError> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("{}{}", base.as_str().trim_end_matches('/'), path_and_query)
        .parse::<Uri>()
        .map_err(|e| GatewayError::InvalidRequest(e.to_string()))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Forwards the request to the upstream.
async fn proxy_handler(State(state): State<AppState>, mut request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request.request_id().to_string();

    if let Some(hook) = request.extensions().get::<PreProxyHook>().cloned() {
        if let Err(e) = hook.run().await {
            let err = GatewayError::SessionSave(e);
            metrics::record_request(method.as_str(), err.status().as_u16(), start);
            return state.errors.handle(&method, &uri, &err);
        }
    }

    let target = match upstream_uri(&state.upstream.load(), &uri) {
        Ok(target) => target,
        Err(err) => {
            metrics::record_request(method.as_str(), err.status().as_u16(), start);
            return state.errors.handle(&method, &uri, &err);
        }
    };
    tracing::debug!(request_id = %request_id, method = %method, target = %target, "Proxying request");

    *request.uri_mut() = target;
    let headers = request.headers_mut();
    strip_hop_by_hop(headers);
    headers.remove(header::HOST);

    match state.client.request(request).await {
        Ok(response) => {
            metrics::record_request(method.as_str(), response.status().as_u16(), start);
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            let err = GatewayError::Upstream(e.to_string());
            metrics::record_request(method.as_str(), err.status().as_u16(), start);
            state.errors.handle(&method, &uri, &err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionStoreKind;
    use axum::http::StatusCode;
    use axum::routing::get;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use std::io::Read;
    use tower::ServiceExt;

    async fn spawn_upstream() -> String {
        let app = Router::new()
            .route(
                "/text",
                get(|| async { ([(header::CONTENT_TYPE, "text/plain")], "upstream says hello ".repeat(100)) }),
            )
            .route(
                "/echo",
                get(|req: Request<Body>| async move { req.uri().to_string() }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(upstream: &str) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.upstream.url = upstream.to_string();
        config
    }

    #[tokio::test]
    async fn test_forwards_path_and_query() {
        let upstream = spawn_upstream().await;
        let server = HttpServer::new(&config(&upstream)).unwrap();
        let response = server
            .router()
            .oneshot(Request::builder().uri("/echo?x=1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"/echo?x=1");
    }

    #[tokio::test]
    async fn test_proxied_response_is_compressed() {
        let upstream = spawn_upstream().await;
        let server = HttpServer::new(&config(&upstream)).unwrap();
        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/text")
                    .header(header::ACCEPT_ENCODING, "gzip")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let mut decoded = String::new();
        flate2::read::GzDecoder::new(&body[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "upstream says hello ".repeat(100));
    }

    #[tokio::test]
    async fn test_session_cookie_set_on_proxied_response() {
        let upstream = spawn_upstream().await;
        let mut config = config(&upstream);
        config.session.enabled = true;
        config.session.store = SessionStoreKind::Kv;
        config.session.secure_encoder.hash_key = STANDARD.encode([9u8; 32]);

        let server = HttpServer::new(&config).unwrap();
        let response = server
            .router()
            .oneshot(Request::builder().uri("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        // Nothing was stored in the session, so no cookie is issued.
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_502() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = HttpServer::new(&config(&format!("http://{}", addr))).unwrap();
        let response = server
            .router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_apply_upstream() {
        let upstream = ArcSwap::from_pointee(Url::parse("http://127.0.0.1:3000").unwrap());
        assert!(!apply_upstream(&upstream, &config("http://127.0.0.1:3000")));
        assert!(!apply_upstream(&upstream, &config("not a url")));
        assert!(apply_upstream(&upstream, &config("http://10.0.0.1:8080/base")));
        assert_eq!(upstream.load().as_str(), "http://10.0.0.1:8080/base");
    }

    #[test]
    fn test_upstream_uri_join() {
        let base = Url::parse("http://10.0.0.1:8080/api/").unwrap();
        let uri: Uri = "/users?id=3".parse().unwrap();
        assert_eq!(
            upstream_uri(&base, &uri).unwrap().to_string(),
            "http://10.0.0.1:8080/api/users?id=3"
        );
    }
}
