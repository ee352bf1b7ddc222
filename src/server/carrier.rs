//! Credential carrier over HTTP headers
//!
//! Browsers hold the session token in an HttpOnly `token` cookie; other
//! clients may send `Authorization: Bearer <token>`. The cookie wins when
//! both are present.

use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use std::time::Duration;
use tracing::warn;

pub const SESSION_COOKIE: &str = "token";

/// Where a request keeps its session token
pub trait CredentialCarrier {
    fn get_token(&self) -> Option<String>;
    fn set_token(&mut self, token: &str, max_age: Duration);
    fn clear_token(&mut self);
}

/// Reads the token from request headers and collects `Set-Cookie` headers
/// for the response
pub struct HeaderCarrier<'a> {
    request: &'a HeaderMap,
    response: HeaderMap,
    secure: bool,
}

impl<'a> HeaderCarrier<'a> {
    pub fn new(request: &'a HeaderMap, secure: bool) -> Self {
        Self {
            request,
            response: HeaderMap::new(),
            secure,
        }
    }

    /// Headers to attach to the response
    pub fn into_response_headers(self) -> HeaderMap {
        self.response
    }

    fn append_cookie(&mut self, value: String) {
        match HeaderValue::from_str(&value) {
            Ok(v) => {
                self.response.append(SET_COOKIE, v);
            }
            Err(e) => warn!(error = %e, "Refusing to emit invalid Set-Cookie header"),
        }
    }

    fn cookie_attributes(&self, max_age: u64) -> String {
        let mut attrs = format!("Path=/; Max-Age={}; HttpOnly; SameSite=Strict", max_age);
        if self.secure {
            attrs.push_str("; Secure");
        }
        attrs
    }
}

impl CredentialCarrier for HeaderCarrier<'_> {
    fn get_token(&self) -> Option<String> {
        token_from_headers(self.request)
    }

    fn set_token(&mut self, token: &str, max_age: Duration) {
        let value = format!(
            "{}={}; {}",
            SESSION_COOKIE,
            token,
            self.cookie_attributes(max_age.as_secs())
        );
        self.append_cookie(value);
    }

    fn clear_token(&mut self) {
        let value = format!("{}=; {}", SESSION_COOKIE, self.cookie_attributes(0));
        self.append_cookie(value);
    }
}

/// Extract the session token from a cookie or bearer header
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(axum::http::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_token_from_cookie() {
        let map = headers(&[(COOKIE, "theme=dark; token=sess-abc.def; lang=en")]);
        assert_eq!(token_from_headers(&map).as_deref(), Some("sess-abc.def"));
    }

    #[test]
    fn test_token_from_bearer() {
        let map = headers(&[(AUTHORIZATION, "Bearer sess-xyz.123")]);
        assert_eq!(token_from_headers(&map).as_deref(), Some("sess-xyz.123"));
    }

    #[test]
    fn test_cookie_preferred_over_bearer() {
        let map = headers(&[
            (AUTHORIZATION, "Bearer from-header"),
            (COOKIE, "token=from-cookie"),
        ]);
        assert_eq!(token_from_headers(&map).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_no_token() {
        assert!(token_from_headers(&HeaderMap::new()).is_none());
        let map = headers(&[(COOKIE, "token="), (AUTHORIZATION, "Basic dXNlcjpwYXNz")]);
        assert!(token_from_headers(&map).is_none());
    }

    #[test]
    fn test_set_and_clear_cookie() {
        let request = HeaderMap::new();
        let mut carrier = HeaderCarrier::new(&request, true);
        carrier.set_token("sess-abc.def", Duration::from_secs(3600));
        carrier.clear_token();

        let response = carrier.into_response_headers();
        let cookies: Vec<_> = response
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();

        assert_eq!(
            cookies[0],
            "token=sess-abc.def; Path=/; Max-Age=3600; HttpOnly; SameSite=Strict; Secure"
        );
        assert_eq!(
            cookies[1],
            "token=; Path=/; Max-Age=0; HttpOnly; SameSite=Strict; Secure"
        );
    }

    #[test]
    fn test_insecure_cookie_omits_secure() {
        let request = HeaderMap::new();
        let mut carrier = HeaderCarrier::new(&request, false);
        carrier.set_token("t", Duration::from_secs(60));
        let response = carrier.into_response_headers();
        let cookie = response.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(!cookie.contains("Secure"));
    }
}
