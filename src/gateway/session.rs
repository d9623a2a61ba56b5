//! Workspace identity cookie.
//!
//! `workspace_session_id` is an opaque value scoped to the wildcard domain so
//! the apex site and every workspace subdomain observe the same identity. It
//! is deliberately independent of the authentication cookie, which belongs to
//! the upstream authenticator.

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;

pub const SESSION_COOKIE: &str = "workspace_session_id";

const SESSION_MAX_AGE_SECS: u64 = 86_400;

/// Read a cookie value out of the request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((key, value)) = pair.trim().split_once('=') {
                if key == name && !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Mint a fresh session id: 16 random bytes, base64url without padding.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Whether a client-presented session id is one we could have minted. Junk
/// values are replaced rather than trusted, since the id becomes part of a
/// filesystem path via the state store.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Build the `Set-Cookie` header for a new session id. The cookie spans the
/// wildcard domain in production; on localhost the Domain attribute is
/// omitted so browsers accept it.
pub fn set_cookie(session_id: &str, base_domain: &str, secure: bool) -> HeaderValue {
    let mut cookie = format!(
        "{SESSION_COOKIE}={session_id}; Path=/; Max-Age={SESSION_MAX_AGE_SECS}; HttpOnly; SameSite=Lax"
    );
    if base_domain != "localhost" {
        cookie.push_str("; Domain=.");
        cookie.push_str(base_domain);
    }
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).expect("cookie string is valid header value")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_base64url_of_16_bytes() {
        let id = new_session_id();
        assert_eq!(id.len(), 22);
        assert!(is_valid_session_id(&id));
        assert_eq!(URL_SAFE_NO_PAD.decode(&id).unwrap().len(), 16);
    }

    #[test]
    fn minted_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
    }

    #[test]
    fn reads_cookie_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("a=1; workspace_session_id=abc123; b=2"),
        );
        assert_eq!(
            cookie_value(&headers, SESSION_COOKIE),
            Some("abc123".to_string())
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn reads_cookie_across_multiple_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1"));
        headers.append(
            COOKIE,
            HeaderValue::from_static("workspace_session_id=abc123"),
        );
        assert_eq!(
            cookie_value(&headers, SESSION_COOKIE),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn session_id_validation() {
        assert!(is_valid_session_id(&new_session_id()));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("../../etc/passwd"));
        assert!(!is_valid_session_id("a b"));
        assert!(!is_valid_session_id(&"x".repeat(65)));
    }

    #[test]
    fn set_cookie_spans_wildcard_domain() {
        let value = set_cookie("abc", "eureka.local", false);
        let raw = value.to_str().unwrap();
        assert!(raw.starts_with("workspace_session_id=abc"));
        assert!(raw.contains("Domain=.eureka.local"));
        assert!(raw.contains("Max-Age=86400"));
        assert!(raw.contains("HttpOnly"));
        assert!(raw.contains("SameSite=Lax"));
        assert!(!raw.contains("Secure"));
    }

    #[test]
    fn set_cookie_on_localhost_has_no_domain() {
        let raw = set_cookie("abc", "localhost", false);
        assert!(!raw.to_str().unwrap().contains("Domain"));
    }

    #[test]
    fn set_cookie_secure_over_https() {
        let raw = set_cookie("abc", "eureka.local", true);
        assert!(raw.to_str().unwrap().contains("Secure"));
    }
}
