//! Session lifecycle.
//!
//! # Data Flow
//! ```text
//! request  → store.get (cookie_store | kv_store) → Session
//!          → SessionHandle + PreProxyHook in request extensions
//!          → handler / proxy (hook saves before the upstream call)
//! response → store.save → Set-Cookie appended before the body is sent
//! ```
//!
//! # Design Decisions
//! - Tampered or expired cookies are a client problem: a fresh session, never a 500
//! - KV transport errors propagate; the stored blob may still be valid
//! - The final save runs to completion even if the client goes away

pub mod cookie;
pub mod cookie_store;
pub mod kv_store;
pub mod middleware;
#[allow(clippy::module_inception)]
pub mod session;
pub mod snapshot;
pub mod store;

use std::sync::Arc;

use axum::http::HeaderValue;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::config::{SessionConfig, SessionStoreKind};
use crate::observability::tracing::SpanTracer;
use crate::security::{EncoderError, HmacAesEncoder};

pub use cookie::CookieCreator;
pub use cookie_store::CookieStore;
pub use kv_store::{KeyValueStore, KvError, KvStore, MemoryKvs};
pub use middleware::{session_middleware, PreProxyHook, SessionHandle, SessionState};
pub use session::{Serialization, Session, SessionFlags};
pub use snapshot::{extract_request, persist_request};
pub use store::SessionStore;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session serialization failed: {0}")]
    Serialization(String),

    #[error("session encoding failed: {0}")]
    Encoding(#[from] EncoderError),

    #[error("session store unavailable: {0}")]
    Transport(String),

    #[error("invalid session cookie: {0}")]
    Cookie(String),

    #[error("request snapshot failed: {0}")]
    Snapshot(String),

    #[error("invalid session configuration: {0}")]
    Config(String),
}

/// Build the configured store. `kvs` backs the `kv` store kind.
pub fn build_store(config: &SessionConfig, kvs: Arc<dyn KeyValueStore>) -> Result<Arc<dyn SessionStore>, SessionError> {
    let hash_key = STANDARD
        .decode(&config.secure_encoder.hash_key)
        .map_err(|e| SessionError::Config(format!("hash_key: {}", e)))?;
    let block_key = config
        .secure_encoder
        .block_key
        .as_ref()
        .map(|key| STANDARD.decode(key))
        .transpose()
        .map_err(|e| SessionError::Config(format!("block_key: {}", e)))?;
    let encoder = Arc::new(HmacAesEncoder::new(&hash_key, block_key.as_deref())?);
    let creator = CookieCreator::new(config.cookie_name.clone(), config.cookie.clone());

    let store: Arc<dyn SessionStore> = match config.store {
        SessionStoreKind::Cookie => Arc::new(CookieStore::new(creator, encoder, config.serialization)),
        SessionStoreKind::Kv => {
            let store = KvStore::new(creator, kvs, encoder, config.serialization, config.prefix.clone());
            if config.trace_kv {
                Arc::new(store.with_tracer(Arc::new(SpanTracer::new("session_kv"))))
            } else {
                Arc::new(store)
            }
        }
    };
    tracing::info!(store = store.kind(), cookie = %config.cookie_name, "Session store ready");
    Ok(store)
}

/// Turn a rendered cookie into a header value.
pub(crate) fn set_cookie_value(rendered: String) -> Result<HeaderValue, SessionError> {
    HeaderValue::try_from(rendered).map_err(|e| SessionError::Cookie(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(store: SessionStoreKind) -> SessionConfig {
        let mut config = SessionConfig {
            enabled: true,
            store,
            ..Default::default()
        };
        config.secure_encoder.hash_key = STANDARD.encode([7u8; 32]);
        config.secure_encoder.block_key = Some(STANDARD.encode([8u8; 32]));
        config
    }

    #[test]
    fn test_build_store_kinds() {
        let kvs: Arc<dyn KeyValueStore> = Arc::new(MemoryKvs::new());
        assert_eq!(build_store(&config(SessionStoreKind::Cookie), kvs.clone()).unwrap().kind(), "cookie");
        assert_eq!(build_store(&config(SessionStoreKind::Kv), kvs).unwrap().kind(), "kv");
    }

    #[test]
    fn test_build_store_rejects_bad_keys() {
        let mut bad = config(SessionStoreKind::Cookie);
        bad.secure_encoder.hash_key = "not base64!".into();
        assert!(matches!(
            build_store(&bad, Arc::new(MemoryKvs::new())),
            Err(SessionError::Config(_))
        ));

        let mut short = config(SessionStoreKind::Cookie);
        short.secure_encoder.hash_key = STANDARD.encode([1u8; 8]);
        assert!(matches!(
            build_store(&short, Arc::new(MemoryKvs::new())),
            Err(SessionError::Encoding(EncoderError::HashKeyLength(8)))
        ));
    }
}
