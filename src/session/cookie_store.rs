//! Session store that keeps the whole session in cookies.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::security::SecureEncoder;
use crate::session::cookie::{collect_chunks, request_cookies, CookieCreator};
use crate::session::session::COOKIE_NAMES_ATTR;
use crate::session::{set_cookie_value, Serialization, Session, SessionError, SessionFlags, SessionStore};

pub struct CookieStore {
    creator: CookieCreator,
    encoder: Arc<dyn SecureEncoder>,
    method: Serialization,
}

impl CookieStore {
    pub fn new(creator: CookieCreator, encoder: Arc<dyn SecureEncoder>, method: Serialization) -> Self {
        Self {
            creator,
            encoder,
            method,
        }
    }

    fn decode(&self, value: &str) -> Result<Vec<u8>, String> {
        let encoded = STANDARD.decode(value).map_err(|e| e.to_string())?;
        self.encoder.decode(&encoded).map_err(|e| e.to_string())
    }
}

fn previous_names(session: &Session) -> Vec<String> {
    session
        .attr(COOKIE_NAMES_ATTR)
        .map(|names| {
            names
                .split(',')
                .filter(|n| !n.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SessionStore for CookieStore {
    async fn get(&self, headers: &HeaderMap) -> Result<Session, SessionError> {
        let cookies = request_cookies(headers);
        let Some((value, names)) = collect_chunks(&cookies, self.creator.name()) else {
            return Ok(Session::new(self.method));
        };

        let mut session = match self.decode(&value) {
            Ok(raw) => Session::restore(raw, self.method)?,
            Err(reason) => {
                tracing::debug!(cookie = %self.creator.name(), reason = %reason, "Discarding undecodable session cookie");
                Session::new(self.method)
            }
        };
        session.set_attr(COOKIE_NAMES_ATTR, names.join(","));
        Ok(session)
    }

    async fn save(&self, session: &mut Session, headers: &mut HeaderMap) -> Result<(), SessionError> {
        let previous = previous_names(session);

        if session.has_flag(SessionFlags::DELETE) {
            for name in &previous {
                headers.append(header::SET_COOKIE, set_cookie_value(self.creator.expire(name))?);
            }
            return Ok(());
        }

        let raw = session.marshal_binary()?;
        if !session.has_flag(SessionFlags::UPDATED) {
            return Ok(());
        }

        let encoded = STANDARD.encode(self.encoder.encode(&raw)?);
        let cookies = self.creator.create(&encoded);
        let written: HashSet<&str> = cookies.iter().map(|(name, _)| name.as_str()).collect();

        for name in previous.iter().filter(|n| !written.contains(n.as_str())) {
            headers.append(header::SET_COOKIE, set_cookie_value(self.creator.expire(name))?);
        }
        let names: Vec<&str> = cookies.iter().map(|(name, _)| name.as_str()).collect();
        session.set_attr(COOKIE_NAMES_ATTR, names.join(","));
        for (_, rendered) in cookies {
            headers.append(header::SET_COOKIE, set_cookie_value(rendered)?);
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "cookie"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CookieAttributes;
    use crate::security::HmacAesEncoder;
    use axum::http::HeaderValue;

    fn store(max_size: usize) -> CookieStore {
        let encoder = HmacAesEncoder::new(&[3u8; 32], Some(&[4u8; 32])).unwrap();
        let attrs = CookieAttributes {
            max_size,
            ..Default::default()
        };
        CookieStore::new(CookieCreator::new("sess", attrs), Arc::new(encoder), Serialization::Binary)
    }

    /// Turn `Set-Cookie` headers into a `Cookie` request header.
    fn echo(set_cookies: &HeaderMap) -> HeaderMap {
        let pairs: Vec<String> = set_cookies
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().split(';').next().unwrap().to_string())
            .filter(|pair| pair.split_once('=').is_some_and(|(_, value)| !value.is_empty()))
            .collect();
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(&pairs.join("; ")).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = store(4000);
        let mut session = store.get(&HeaderMap::new()).await.unwrap();
        assert!(session.has_flag(SessionFlags::NEW));
        session.persist("user", "alice").unwrap();

        let mut out = HeaderMap::new();
        store.save(&mut session, &mut out).await.unwrap();
        assert_eq!(out.get_all(header::SET_COOKIE).iter().count(), 1);

        let restored = store.get(&echo(&out)).await.unwrap();
        assert!(restored.has_flag(SessionFlags::RESTORED));
        assert_eq!(restored.extract::<String>("user").unwrap().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_large_session_is_chunked() {
        let store = store(64);
        let mut session = Session::new(Serialization::Binary);
        session.persist("blob", &"x".repeat(500)).unwrap();

        let mut out = HeaderMap::new();
        store.save(&mut session, &mut out).await.unwrap();
        assert!(out.get_all(header::SET_COOKIE).iter().count() > 1);

        let restored = store.get(&echo(&out)).await.unwrap();
        assert_eq!(restored.extract::<String>("blob").unwrap(), Some("x".repeat(500)));
    }

    #[tokio::test]
    async fn test_unchanged_session_writes_nothing() {
        let store = store(4000);
        let mut session = Session::new(Serialization::Binary);
        session.persist("a", &1u8).unwrap();
        let mut first = HeaderMap::new();
        store.save(&mut session, &mut first).await.unwrap();

        let mut restored = store.get(&echo(&first)).await.unwrap();
        let mut out = HeaderMap::new();
        store.save(&mut restored, &mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_tampered_cookie_yields_fresh_session() {
        let store = store(4000);
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("sess=bm90IGEgdmFsaWQgc2Vzc2lvbiBhdCBhbGwgLSB0YW1wZXJlZA=="));
        let session = store.get(&headers).await.unwrap();
        assert!(session.has_flag(SessionFlags::NEW));
        assert_eq!(session.attr(COOKIE_NAMES_ATTR), Some("sess"));
    }

    #[tokio::test]
    async fn test_delete_expires_every_chunk() {
        let store = store(64);
        let mut session = Session::new(Serialization::Binary);
        session.persist("blob", &"y".repeat(300)).unwrap();
        let mut first = HeaderMap::new();
        store.save(&mut session, &mut first).await.unwrap();
        let chunks = first.get_all(header::SET_COOKIE).iter().count();

        let mut restored = store.get(&echo(&first)).await.unwrap();
        restored.invalidate();
        let mut out = HeaderMap::new();
        store.save(&mut restored, &mut out).await.unwrap();
        let expired: Vec<_> = out.get_all(header::SET_COOKIE).iter().collect();
        assert_eq!(expired.len(), chunks);
        assert!(expired.iter().all(|v| v.to_str().unwrap().contains("Max-Age=0")));
    }

    #[tokio::test]
    async fn test_shrinking_session_expires_stale_chunks() {
        let store = store(120);
        let mut session = Session::new(Serialization::Binary);
        session.persist("blob", &"z".repeat(300)).unwrap();
        let mut first = HeaderMap::new();
        store.save(&mut session, &mut first).await.unwrap();

        let mut restored = store.get(&echo(&first)).await.unwrap();
        restored.delete("blob");
        let mut out = HeaderMap::new();
        store.save(&mut restored, &mut out).await.unwrap();
        let values: Vec<_> = out.get_all(header::SET_COOKIE).iter().map(|v| v.to_str().unwrap().to_string()).collect();
        assert!(values.iter().any(|v| v.starts_with("sess=") && !v.contains("Max-Age=0")));
        assert!(values.iter().any(|v| v.starts_with("sess_0=;")));
    }
}
