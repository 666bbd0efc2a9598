//! Reverse proxy router.
//!
//! Each target is mounted at a path prefix. The prefix is stripped from the
//! inbound path and the remainder is joined onto the target's base URL path.
//! The verified principal, if any, is forwarded as `X-User-ID`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{ConnectInfo, DefaultBodyLimit, FromRequest, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
    routing::any,
};
use tracing::{debug, error};
use url::Url;

use super::GatewayError;
use super::verifier::AuthenticatedPrincipal;

/// Header carrying the verified user ID to backends.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the gateway shared secret to backends.
pub const GATEWAY_SECRET_HEADER: &str = "x-gateway-secret";

/// Largest request body the gateway will buffer.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers that apply to a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Join two path segments with exactly one slash between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{}/{}", a, b),
        _ => format!("{}{}", a, b),
    }
}

/// Build the backend URL for an inbound path below `prefix`.
pub fn rewrite_url(base: &Url, prefix: &str, path: &str, query: Option<&str>) -> Url {
    let suffix = path.strip_prefix(prefix).unwrap_or(path);
    let suffix = if suffix.is_empty() { "/" } else { suffix };

    let mut url = base.clone();
    url.set_path(&single_joining_slash(base.path(), suffix));
    url.set_query(query);
    url
}

/// A backend mounted under a path prefix.
#[derive(Clone)]
pub struct ProxyTarget {
    pub prefix: String,
    pub base: Url,
    client: reqwest::Client,
    gateway_secret: Option<Arc<str>>,
}

impl ProxyTarget {
    pub fn new(
        prefix: impl Into<String>,
        base: Url,
        client: reqwest::Client,
        gateway_secret: Option<Arc<str>>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            base,
            client,
            gateway_secret,
        }
    }

    /// Routes for `prefix`, `prefix/` and everything below it.
    pub fn router(self) -> Router {
        let prefix = self.prefix.clone();
        Router::new()
            .route(&prefix, any(forward))
            .route(&format!("{}/", prefix), any(forward))
            .route(&format!("{}/{{*rest}}", prefix), any(forward))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .with_state(self)
    }
}

/// Copy end-to-end headers. Drops hop-by-hop headers, anything the
/// `Connection` header names, and headers the gateway sets itself.
fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let named_by_connection: Vec<String> = inbound
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .collect();

    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        let name_str = name.as_str();
        if HOP_BY_HOP.contains(&name_str)
            || named_by_connection.iter().any(|n| n == name_str)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || name_str == USER_ID_HEADER
            || name_str == GATEWAY_SECRET_HEADER
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn append_forwarded_for(headers: &mut HeaderMap, client: Option<SocketAddr>) {
    let Some(client) = client else {
        return;
    };
    let ip = client.ip().to_string();
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, ip),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static("x-forwarded-for"), value);
    }
}

async fn forward(
    State(target): State<ProxyTarget>,
    request: Request,
) -> Result<Response, GatewayError> {
    let (parts, body) = request.into_parts();

    let url = rewrite_url(
        &target.base,
        &target.prefix,
        parts.uri.path(),
        parts.uri.query(),
    );

    let mut headers = forwarded_headers(&parts.headers);
    let client_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    append_forwarded_for(&mut headers, client_addr);

    if let Some(principal) = parts.extensions.get::<AuthenticatedPrincipal>() {
        let value = HeaderValue::from_str(&principal.user_id)
            .map_err(|_| GatewayError::Upstream("user ID is not a valid header value".into()))?;
        headers.insert(HeaderName::from_static(USER_ID_HEADER), value);
    }
    if let Some(secret) = &target.gateway_secret {
        let value = HeaderValue::from_str(secret)
            .map_err(|_| GatewayError::Upstream("gateway secret is not a valid header value".into()))?;
        headers.insert(HeaderName::from_static(GATEWAY_SECRET_HEADER), value);
    }

    let method = parts.method.clone();
    debug!(method = %method, from = %parts.uri.path(), to = %url, "Proxying request");

    let body = Bytes::from_request(Request::from_parts(parts, body), &())
        .await
        .map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                GatewayError::PayloadTooLarge
            } else {
                GatewayError::BadRequest(rejection.body_text())
            }
        })?;

    let upstream = target
        .client
        .request(method, url.clone())
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            error!(url = %url, error = %e, "Upstream request failed");
            GatewayError::Upstream(e.to_string())
        })?;

    let mut response_builder = Response::builder().status(upstream.status());
    for (name, value) in upstream.headers() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        response_builder = response_builder.header(name, value);
    }

    response_builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| GatewayError::Upstream(format!("Response build failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[test]
    fn test_single_joining_slash() {
        assert_eq!(single_joining_slash("/api/", "/x"), "/api/x");
        assert_eq!(single_joining_slash("/api", "x"), "/api/x");
        assert_eq!(single_joining_slash("/api/", "x"), "/api/x");
        assert_eq!(single_joining_slash("/api", "/x"), "/api/x");
        assert_eq!(single_joining_slash("/api", ""), "/api/");
        assert_eq!(single_joining_slash("/", "/"), "/");
    }

    #[test]
    fn test_rewrite_url() {
        let base = Url::parse("http://shortener:8081").unwrap();
        let url = rewrite_url(&base, "/api/shorten", "/api/shorten/abc", Some("x=1"));
        assert_eq!(url.as_str(), "http://shortener:8081/abc?x=1");

        let url = rewrite_url(&base, "/api/shorten", "/api/shorten", None);
        assert_eq!(url.as_str(), "http://shortener:8081/");

        let base = Url::parse("http://auth:8080/api/auth").unwrap();
        let url = rewrite_url(&base, "/api/auth", "/api/auth/login", None);
        assert_eq!(url.as_str(), "http://auth:8080/api/auth/login");

        let url = rewrite_url(&base, "/api/auth", "/api/auth/", None);
        assert_eq!(url.as_str(), "http://auth:8080/api/auth/");
    }

    #[test]
    fn test_forwarded_headers_strip_spoofing_and_hop_by_hop() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("gateway"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-custom-hop"));
        inbound.insert("x-custom-hop", HeaderValue::from_static("1"));
        inbound.insert("x-user-id", HeaderValue::from_static("spoofed"));
        inbound.insert("x-gateway-secret", HeaderValue::from_static("guess"));
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        inbound.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let headers = forwarded_headers(&inbound);
        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("x-custom-hop").is_none());
        assert!(headers.get("x-user-id").is_none());
        assert!(headers.get("x-gateway-secret").is_none());
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer t");
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn test_append_forwarded_for() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, Some(SocketAddr::from(([10, 0, 0, 7], 5000))));
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.7");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));
        append_forwarded_for(&mut headers, Some(SocketAddr::from(([10, 0, 0, 7], 5000))));
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "203.0.113.1, 10.0.0.7");
    }

    #[tokio::test]
    async fn test_oversized_body_is_payload_too_large() {
        let target = ProxyTarget::new(
            "/api/shorten",
            Url::parse("http://127.0.0.1:9").unwrap(),
            reqwest::Client::new(),
            None,
        );

        let response = target
            .router()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/shorten")
                    .body(Body::from(vec![b'x'; MAX_BODY_BYTES + 1]))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
