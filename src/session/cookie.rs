//! Session cookie rendering and parsing.
//!
//! Values longer than `max_size` are split across `<name>_0`, `<name>_1`, ...
//! A value that fits is written under `<name>` alone.

use axum::http::{header, HeaderMap};

use crate::config::CookieAttributes;

const EPOCH: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Renders `Set-Cookie` values for one logical cookie.
#[derive(Debug, Clone)]
pub struct CookieCreator {
    name: String,
    attrs: CookieAttributes,
}

impl CookieCreator {
    pub fn new(name: impl Into<String>, attrs: CookieAttributes) -> Self {
        Self {
            name: name.into(),
            attrs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_age_secs(&self) -> Option<u64> {
        self.attrs.max_age_secs
    }

    /// `(cookie name, Set-Cookie value)` pairs carrying `value`.
    pub fn create(&self, value: &str) -> Vec<(String, String)> {
        let max = self.attrs.max_size;
        if max == 0 || value.len() <= max {
            return vec![(self.name.clone(), self.render(&self.name, value, false))];
        }
        split_ascii(value, max)
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let name = format!("{}_{}", self.name, i);
                let rendered = self.render(&name, chunk, false);
                (name, rendered)
            })
            .collect()
    }

    /// A `Set-Cookie` value that makes the client drop `name`.
    pub fn expire(&self, name: &str) -> String {
        self.render(name, "", true)
    }

    fn render(&self, name: &str, value: &str, expire: bool) -> String {
        let mut out = format!("{}={}", name, value);
        if !self.attrs.path.is_empty() {
            out.push_str("; Path=");
            out.push_str(&self.attrs.path);
        }
        if let Some(domain) = &self.attrs.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if expire {
            out.push_str("; Max-Age=0; Expires=");
            out.push_str(EPOCH);
        } else if let Some(max_age) = self.attrs.max_age_secs {
            out.push_str(&format!("; Max-Age={}", max_age));
        }
        if self.attrs.secure {
            out.push_str("; Secure");
        }
        if self.attrs.http_only {
            out.push_str("; HttpOnly");
        }
        out.push_str("; SameSite=");
        out.push_str(self.attrs.same_site.as_str());
        out
    }
}

/// Split on char boundaries into pieces of at most `max` bytes.
fn split_ascii(value: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let mut at = rest.len().min(max);
        while !rest.is_char_boundary(at) {
            at -= 1;
        }
        if at == 0 {
            // A single char wider than `max`; emit it whole.
            at = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        }
        let (head, tail) = rest.split_at(at);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

/// All `name=value` pairs from the request's `Cookie` headers.
pub fn request_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let value = value.trim().trim_matches('"');
            Some((name.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// First value of the cookie called exactly `name`.
pub fn find_cookie<'a>(cookies: &'a [(String, String)], name: &str) -> Option<&'a str> {
    cookies.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
}

/// Reassemble the logical cookie `name` from either `<name>` or its
/// numbered chunks. Returns the value and every cookie name that matched.
pub fn collect_chunks(cookies: &[(String, String)], name: &str) -> Option<(String, Vec<String>)> {
    let mut whole = None;
    let mut chunks: Vec<(usize, &str)> = Vec::new();
    let mut names = Vec::new();

    for (cookie_name, value) in cookies {
        if cookie_name == name {
            whole.get_or_insert(value.as_str());
            names.push(cookie_name.clone());
            continue;
        }
        let index = cookie_name
            .strip_prefix(name)
            .and_then(|rest| rest.strip_prefix('_'))
            .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(index) = index {
            chunks.push((index, value.as_str()));
            names.push(cookie_name.clone());
        }
    }

    if names.is_empty() {
        return None;
    }
    let value = match whole {
        Some(v) => v.to_string(),
        None => {
            chunks.sort_by_key(|(i, _)| *i);
            chunks.dedup_by_key(|(i, _)| *i);
            chunks.into_iter().map(|(_, v)| v).collect()
        }
    };
    Some((value, names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SameSite;
    use axum::http::HeaderValue;

    fn creator(max_size: usize) -> CookieCreator {
        CookieCreator::new(
            "sid",
            CookieAttributes {
                path: "/".into(),
                domain: Some("example.com".into()),
                max_age_secs: Some(600),
                secure: true,
                http_only: true,
                same_site: SameSite::Strict,
                max_size,
            },
        )
    }

    #[test]
    fn test_render_attributes() {
        let cookies = creator(100).create("abc");
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].0, "sid");
        assert_eq!(
            cookies[0].1,
            "sid=abc; Path=/; Domain=example.com; Max-Age=600; Secure; HttpOnly; SameSite=Strict"
        );
    }

    #[test]
    fn test_expire() {
        let expired = creator(100).expire("sid_1");
        assert!(expired.starts_with("sid_1=; Path=/"));
        assert!(expired.contains("Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT"));
        assert!(!expired.contains("Max-Age=600"));
    }

    #[test]
    fn test_split_and_reassemble() {
        let value = "0123456789abcdefghij";
        let cookies = creator(8).create(value);
        let names: Vec<_> = cookies.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["sid_0", "sid_1", "sid_2"]);

        // Browsers may send cookies in any order.
        let sent = vec![
            ("sid_2".to_string(), "ghij".to_string()),
            ("other".to_string(), "x".to_string()),
            ("sid_0".to_string(), "01234567".to_string()),
            ("sid_1".to_string(), "89abcdef".to_string()),
        ];
        let (joined, mut seen) = collect_chunks(&sent, "sid").unwrap();
        assert_eq!(joined, value);
        seen.sort();
        assert_eq!(seen, vec!["sid_0", "sid_1", "sid_2"]);
    }

    #[test]
    fn test_similar_names_are_ignored() {
        let sent = vec![("sid_extra".to_string(), "x".to_string()), ("sidx".to_string(), "y".to_string())];
        assert!(collect_chunks(&sent, "sid").is_none());
    }

    #[test]
    fn test_request_cookies_parsing() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("a=1; b=\"two\""));
        headers.append(header::COOKIE, HeaderValue::from_static("c=x=y;broken"));
        let cookies = request_cookies(&headers);
        assert_eq!(
            cookies,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two".to_string()),
                ("c".to_string(), "x=y".to_string()),
            ]
        );
        assert_eq!(find_cookie(&cookies, "b"), Some("two"));
    }
}
