//! The session store capability.

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::session::{Session, SessionError};

/// Loads a session from request headers and writes it back as response
/// headers.
///
/// `get` yields a fresh `NEW` session for a missing, expired or tampered
/// cookie; only server-side failures are errors.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, headers: &HeaderMap) -> Result<Session, SessionError>;

    /// Persist `session`, appending any `Set-Cookie` values to `headers`.
    async fn save(&self, session: &mut Session, headers: &mut HeaderMap) -> Result<(), SessionError>;

    /// Short label used in logs and metrics.
    fn kind(&self) -> &'static str;
}
