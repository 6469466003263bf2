//! Session store that keeps only an ID in the cookie and the payload in a
//! key/value service.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::Instrument;

use crate::observability::tracing::Tracer;
use crate::security::SecureEncoder;
use crate::session::cookie::{find_cookie, request_cookies, CookieCreator};
use crate::session::session::SESSION_ID_ATTR;
use crate::session::{set_cookie_value, Serialization, Session, SessionError, SessionFlags, SessionStore};

const ID_RANDOM_LEN: usize = 16;
const HOST_ID_LEN: usize = 8;
const BASE32_HEX: &[u8; 32] = b"0123456789ABCDEFGHIJKLMNOPQRSTUV";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KvError {
    #[error("key not found")]
    NotFound,

    #[error("kv transport error: {0}")]
    Transport(String),
}

/// Minimal key/value capability backing the session store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), KvError>;
    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), KvError>;
}

/// In-process [`KeyValueStore`] with per-entry expiry.
#[derive(Debug, Default)]
pub struct MemoryKvs {
    entries: DashMap<String, (Vec<u8>, Option<Instant>)>,
}

impl MemoryKvs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries
            .retain(|_, (_, expires)| expires.map_or(true, |at| at > now));
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvs {
    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
        let expired = match self.entries.get(key) {
            None => return Err(KvError::NotFound),
            Some(entry) => {
                let (value, expires) = entry.value();
                match expires {
                    Some(at) if *at <= Instant::now() => true,
                    _ => return Ok(value.clone()),
                }
            }
        };
        if expired {
            self.entries.remove(key);
        }
        Err(KvError::NotFound)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), KvError> {
        let expires = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// First bytes of SHA-256 over the host name.
fn host_id() -> &'static [u8; HOST_ID_LEN] {
    static HOST_ID: OnceLock<[u8; HOST_ID_LEN]> = OnceLock::new();
    HOST_ID.get_or_init(|| {
        let digest = Sha256::digest(host_name().as_bytes());
        let mut id = [0u8; HOST_ID_LEN];
        id.copy_from_slice(&digest[..HOST_ID_LEN]);
        id
    })
}

fn host_name() -> String {
    #[cfg(unix)]
    if let Ok(name) = nix::unistd::gethostname() {
        if let Some(name) = name.to_str() {
            return name.to_string();
        }
    }
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_default()
}

/// RFC 4648 base32hex without padding. The `base64` crate has no base32
/// alphabets.
fn base32_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(5) * 8);
    let mut buffer: u16 = 0;
    let mut bits = 0;
    for &byte in bytes {
        buffer = (buffer << 8) | u16::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_HEX[usize::from((buffer >> bits) & 0x1f)] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_HEX[usize::from((buffer << (5 - bits)) & 0x1f)] as char);
    }
    out
}

fn is_session_id(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| BASE32_HEX.contains(&b))
}

/// A new session ID: 128 random bits followed by the host identifier.
pub fn new_session_id() -> String {
    let mut raw = [0u8; ID_RANDOM_LEN + HOST_ID_LEN];
    rand::rngs::OsRng.fill_bytes(&mut raw[..ID_RANDOM_LEN]);
    raw[ID_RANDOM_LEN..].copy_from_slice(host_id());
    base32_hex(&raw)
}

pub struct KvStore {
    creator: CookieCreator,
    kvs: Arc<dyn KeyValueStore>,
    encoder: Arc<dyn SecureEncoder>,
    method: Serialization,
    prefix: String,
    tracer: Option<Arc<dyn Tracer>>,
}

impl KvStore {
    pub fn new(
        creator: CookieCreator,
        kvs: Arc<dyn KeyValueStore>,
        encoder: Arc<dyn SecureEncoder>,
        method: Serialization,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            creator,
            kvs,
            encoder,
            method,
            prefix: prefix.into(),
            tracer: None,
        }
    }

    /// Trace every KV read.
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    fn ttl(&self) -> Option<Duration> {
        self.creator.max_age_secs().map(Duration::from_secs)
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, KvError> {
        match &self.tracer {
            Some(tracer) => self.kvs.get(key).instrument(tracer.span("GET", key)).await,
            None => self.kvs.get(key).await,
        }
    }
}

#[async_trait]
impl SessionStore for KvStore {
    async fn get(&self, headers: &HeaderMap) -> Result<Session, SessionError> {
        let cookies = request_cookies(headers);
        let Some(id) = find_cookie(&cookies, self.creator.name()).filter(|id| is_session_id(id)) else {
            return Ok(Session::new(self.method));
        };

        let blob = match self.fetch(&self.key(id)).await {
            Ok(blob) => blob,
            Err(KvError::NotFound) => {
                tracing::debug!("Session ID not found in store, starting a new session");
                return Ok(Session::new(self.method));
            }
            Err(KvError::Transport(e)) => return Err(SessionError::Transport(e)),
        };

        let raw = match self.encoder.decode(&blob) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(error = %e, "Discarding undecodable session payload");
                return Ok(Session::new(self.method));
            }
        };
        let mut session = Session::restore(raw, self.method)?;
        session.set_attr(SESSION_ID_ATTR, id);
        Ok(session)
    }

    async fn save(&self, session: &mut Session, headers: &mut HeaderMap) -> Result<(), SessionError> {
        let existing = session.attr(SESSION_ID_ATTR).map(String::from);

        if session.has_flag(SessionFlags::DELETE) {
            if !session.has_flag(SessionFlags::RESTORED) {
                return Ok(());
            }
            if let Some(id) = &existing {
                self.kvs
                    .delete(&self.key(id))
                    .await
                    .map_err(|e| SessionError::Transport(e.to_string()))?;
            }
            headers.append(header::SET_COOKIE, set_cookie_value(self.creator.expire(self.creator.name()))?);
            return Ok(());
        }

        // Restored sessions are rewritten even when unchanged so the KV TTL
        // and cookie Max-Age slide with activity.
        let refresh = session.has_flag(SessionFlags::REFRESH);
        let restored = session.has_flag(SessionFlags::RESTORED) && existing.is_some();
        if !session.has_flag(SessionFlags::UPDATED) && !restored {
            return Ok(());
        }

        let (id, retired) = match existing {
            Some(id) if refresh => (new_session_id(), Some(id)),
            Some(id) => (id, None),
            None => (new_session_id(), None),
        };

        let raw = session.marshal_binary()?;
        let blob = self.encoder.encode(&raw)?;
        self.kvs
            .set(&self.key(&id), blob, self.ttl())
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        if let Some(old) = retired {
            if let Err(e) = self.kvs.delete(&self.key(&old)).await {
                tracing::warn!(error = %e, "Failed to remove retired session ID");
            }
        }

        session.clear_flag(SessionFlags::REFRESH);
        session.set_attr(SESSION_ID_ATTR, id.clone());
        for (_, rendered) in self.creator.create(&id) {
            headers.append(header::SET_COOKIE, set_cookie_value(rendered)?);
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "kv"
    }
}
