//! Request snapshots kept in a session so a request can be replayed after an
//! external round trip, such as a login redirect.
//!
//! Credentials are never stored: `Cookie`, `Authorization` and URL userinfo
//! are dropped on persist and taken from the current request on extract.

use axum::body::{to_bytes, Body};
use axum::http::uri::{Authority, Parts as UriParts};
use axum::http::{header, HeaderName, HeaderValue, Method, Request, Uri};
use serde::{Deserialize, Serialize};

use crate::session::{Session, SessionError};

/// Session key holding the snapshot.
pub const SNAPSHOT_KEY: &str = "__request_snapshot";

const CREDENTIAL_HEADERS: [HeaderName; 2] = [header::COOKIE, header::AUTHORIZATION];

#[derive(Debug, Serialize, Deserialize)]
struct RequestSnapshot {
    method: String,
    uri: String,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
}

fn snapshot_error(e: impl std::fmt::Display) -> SessionError {
    SessionError::Snapshot(e.to_string())
}

fn split_userinfo(authority: &Authority) -> (Option<&str>, &str) {
    match authority.as_str().rsplit_once('@') {
        Some((userinfo, host)) => (Some(userinfo), host),
        None => (None, authority.as_str()),
    }
}

/// `uri` with its authority's userinfo replaced by `userinfo`.
fn with_userinfo(uri: Uri, userinfo: Option<&str>) -> Result<Uri, SessionError> {
    let Some(authority) = uri.authority() else {
        return Ok(uri);
    };
    let (_, host) = split_userinfo(authority);
    let authority = match userinfo {
        Some(userinfo) => format!("{}@{}", userinfo, host),
        None => host.to_string(),
    };
    let mut parts = UriParts::from(uri);
    parts.authority = Some(authority.parse::<Authority>().map_err(snapshot_error)?);
    Uri::from_parts(parts).map_err(snapshot_error)
}

/// Store `req` in the session and hand back an equivalent request.
///
/// The body is buffered up to `limit` bytes; larger bodies fail.
pub async fn persist_request(
    session: &mut Session,
    req: Request<Body>,
    limit: usize,
) -> Result<Request<Body>, SessionError> {
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, limit).await.map_err(snapshot_error)?;

    let snapshot = RequestSnapshot {
        method: parts.method.as_str().to_string(),
        uri: with_userinfo(parts.uri.clone(), None)?.to_string(),
        headers: parts
            .headers
            .iter()
            .filter(|(name, _)| !CREDENTIAL_HEADERS.contains(name))
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect(),
        body: bytes.to_vec(),
    };
    session.persist(SNAPSHOT_KEY, &snapshot)?;

    Ok(Request::from_parts(parts, Body::from(bytes)))
}

/// Rebuild the stored request, if any, and remove it from the session.
pub fn extract_request<B>(session: &mut Session, current: &Request<B>) -> Result<Option<Request<Body>>, SessionError> {
    let Some(snapshot) = session.extract::<RequestSnapshot>(SNAPSHOT_KEY)? else {
        return Ok(None);
    };
    session.delete(SNAPSHOT_KEY);

    let userinfo = current.uri().authority().and_then(|a| split_userinfo(a).0);
    let uri: Uri = snapshot.uri.parse().map_err(snapshot_error)?;
    let uri = with_userinfo(uri, userinfo)?;
    let method = Method::from_bytes(snapshot.method.as_bytes()).map_err(snapshot_error)?;

    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(snapshot.body))
        .map_err(snapshot_error)?;

    let headers = req.headers_mut();
    for (name, value) in snapshot.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(snapshot_error)?;
        let value = HeaderValue::from_bytes(&value).map_err(snapshot_error)?;
        headers.append(name, value);
    }
    for name in CREDENTIAL_HEADERS {
        for value in current.headers().get_all(&name) {
            headers.append(name.clone(), value.clone());
        }
    }
    Ok(Some(req))
}
