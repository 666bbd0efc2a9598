//! Refresh-token cookie handling.

use axum::http::header;

use crate::jwt::IssuedToken;

/// Cookie name for the refresh token (7 days).
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(cookie_header) = cookie_header.to_str() else {
            continue;
        };
        for part in cookie_header.split(';') {
            let part = part.trim();
            if let Some((key, value)) = part.split_once('=')
                && key.trim() == name
            {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Build the Set-Cookie value for a refresh token. The cookie lives exactly as
/// long as the token.
pub fn refresh_cookie(token: &IssuedToken, now: u64, secure: bool) -> String {
    let max_age = token.expires_at.saturating_sub(now);
    let secure = if secure { "; Secure" } else { "" };
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
        REFRESH_COOKIE_NAME, token.token, max_age, secure
    )
}

/// Build the Set-Cookie value that removes the refresh token cookie.
pub fn clear_refresh_cookie(secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!(
        "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0{}",
        REFRESH_COOKIE_NAME, secure
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn issued(expires_at: u64) -> IssuedToken {
        IssuedToken {
            token: "abc.def.ghi".to_string(),
            jti: "jti".to_string(),
            issued_at: 1000,
            expires_at,
        }
    }

    #[test]
    fn test_get_cookie_simple() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("refresh_token=abc123"),
        );

        assert_eq!(get_cookie(&headers, "refresh_token"), Some("abc123"));
    }

    #[test]
    fn test_get_cookie_multiple() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("foo=bar; refresh_token=xyz789"),
        );

        assert_eq!(get_cookie(&headers, "refresh_token"), Some("xyz789"));
        assert_eq!(get_cookie(&headers, "foo"), Some("bar"));
    }

    #[test]
    fn test_get_cookie_across_headers() {
        let mut headers = axum::http::HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("foo=bar"));
        headers.append(header::COOKIE, HeaderValue::from_static("refresh_token=xyz"));

        assert_eq!(get_cookie(&headers, "refresh_token"), Some("xyz"));
    }

    #[test]
    fn test_get_cookie_not_found() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("foo=bar"));

        assert_eq!(get_cookie(&headers, "refresh_token"), None);
        assert_eq!(get_cookie(&axum::http::HeaderMap::new(), "refresh_token"), None);
    }

    #[test]
    fn test_refresh_cookie_attributes() {
        let cookie = refresh_cookie(&issued(1000 + 604800), 1000, false);
        assert_eq!(
            cookie,
            "refresh_token=abc.def.ghi; HttpOnly; SameSite=Lax; Path=/; Max-Age=604800"
        );

        let cookie = refresh_cookie(&issued(1500), 1000, true);
        assert!(cookie.ends_with("Max-Age=500; Secure"));
    }

    #[test]
    fn test_clear_cookie() {
        let cookie = clear_refresh_cookie(false);
        assert!(cookie.starts_with("refresh_token=;"));
        assert!(cookie.contains("Max-Age=0"));
        assert!(cookie.contains("HttpOnly"));
    }
}
