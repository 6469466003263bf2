//! Session middleware.
//!
//! # Responsibilities
//! - Load the session before the handler runs
//! - Expose it to handlers as a [`SessionHandle`] request extension
//! - Register a [`PreProxyHook`] that saves before the upstream call
//! - Save after the handler returns and put `Set-Cookie` on the response head
//!
//! # Design Decisions
//! - Axum hands back the whole response head before any body byte is sent,
//!   so saving after `next.run` keeps cookies ahead of the body
//! - The final save runs in its own task; a client disconnect does not cancel it
//! - Cookies from successive saves are merged by name, the latest value wins

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tokio::sync::{Mutex, MutexGuard};

use crate::errors::{ErrorHandler, GatewayError};
use crate::observability::metrics;
use crate::session::{Session, SessionError, SessionStore};

/// State shared by every request passing through the session layer.
#[derive(Clone)]
pub struct SessionState {
    store: Arc<dyn SessionStore>,
    errors: Arc<dyn ErrorHandler>,
}

impl SessionState {
    pub fn new(store: Arc<dyn SessionStore>, errors: Arc<dyn ErrorHandler>) -> Self {
        Self { store, errors }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }
}

struct HandleInner {
    session: Mutex<Session>,
    /// `(cookie name, Set-Cookie value)` produced by saves so far.
    pending: parking_lot::Mutex<Vec<(String, HeaderValue)>>,
    saved: AtomicBool,
    store: Arc<dyn SessionStore>,
}

/// Request-scoped access to the session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

impl SessionHandle {
    pub fn new(session: Session, store: Arc<dyn SessionStore>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                session: Mutex::new(session),
                pending: parking_lot::Mutex::new(Vec::new()),
                saved: AtomicBool::new(false),
                store,
            }),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.session.lock().await
    }

    /// Write the session through the store, queueing its cookies.
    pub async fn save(&self) -> Result<(), SessionError> {
        let mut session = self.inner.session.lock().await;
        let mut headers = HeaderMap::new();
        self.inner.store.save(&mut session, &mut headers).await?;
        drop(session);

        let mut pending = self.inner.pending.lock();
        for value in headers.get_all(header::SET_COOKIE) {
            let name = cookie_name(value);
            pending.retain(|(existing, _)| *existing != name);
            pending.push((name, value.clone()));
        }
        Ok(())
    }

    /// Final save. Later calls are no-ops.
    pub async fn commit(&self) -> Result<(), SessionError> {
        if self.inner.saved.load(Ordering::Acquire) {
            return Ok(());
        }
        self.save().await?;
        self.inner.saved.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_saved(&self) -> bool {
        self.inner.saved.load(Ordering::Acquire)
    }

    fn take_cookies(&self) -> Vec<HeaderValue> {
        std::mem::take(&mut *self.inner.pending.lock())
            .into_iter()
            .map(|(_, value)| value)
            .collect()
    }
}

fn cookie_name(value: &HeaderValue) -> String {
    let raw = String::from_utf8_lossy(value.as_bytes());
    raw.split_once('=').map(|(name, _)| name.trim().to_string()).unwrap_or_default()
}

/// Saves the session just before a request is forwarded upstream.
#[derive(Clone)]
pub struct PreProxyHook {
    handle: SessionHandle,
}

impl PreProxyHook {
    pub async fn run(&self) -> Result<(), SessionError> {
        self.handle.save().await
    }
}

pub async fn session_middleware(State(state): State<SessionState>, mut req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let kind = state.store.kind();

    let session = match state.store.get(req.headers()).await {
        Ok(session) => session,
        Err(e) => return state.errors.handle(&method, &uri, &GatewayError::Session(e)),
    };

    let handle = SessionHandle::new(session, state.store.clone());
    req.extensions_mut().insert(handle.clone());
    req.extensions_mut().insert(PreProxyHook { handle: handle.clone() });

    let mut response = next.run(req).await;

    let committing = handle.clone();
    let result = match tokio::spawn(async move { committing.commit().await }).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(GatewayError::SessionSave(e)),
        Err(e) => Err(GatewayError::Internal(format!("session save task failed: {}", e))),
    };

    match result {
        Ok(()) => {
            metrics::record_session_save(kind, "ok");
            let headers = response.headers_mut();
            for value in handle.take_cookies() {
                headers.append(header::SET_COOKIE, value);
            }
            response
        }
        Err(err) => {
            metrics::record_session_save(kind, "error");
            state.errors.handle(&method, &uri, &err)
        }
    }
}
