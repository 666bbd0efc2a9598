#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{ConnectInfo, State},
    http::{Method, Request, Response, Uri, header},
};
use linkgate::{
    AuthServerConfig,
    auth::IpExtractor,
    backend::{HasGatewaySecret, TrustedPrincipal},
    create_auth_app,
    db::Database,
    gateway::GatewayConfig,
    keys::KeyPair,
    rate_limit::RateLimits,
    start_auth_server, start_gateway,
};
use serde_json::Value;
use url::Url;

pub const EMAIL: &str = "a@b.com";
pub const PASSWORD: &str = "longenough1";
pub const GATEWAY_SECRET: &str = "test-gateway-secret-that-is-long-enough";

/// Limits high enough that tests never hit them.
pub fn generous_limits() -> RateLimits {
    RateLimits {
        login_per_minute: 10_000,
        login_burst: 10_000,
        signup_per_hour: 10_000,
    }
}

pub async fn auth_config(limits: RateLimits) -> AuthServerConfig {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    AuthServerConfig {
        db,
        keys: KeyPair::generate().expect("Failed to generate keys"),
        secure_cookies: false,
        bcrypt_cost: 4,
        rate_limits: limits,
        ip_extractor: IpExtractor::default(),
    }
}

/// Auth app for `oneshot` tests. Returns (app, db, keys).
pub async fn create_test_app() -> (Router, Database, KeyPair) {
    create_test_app_with_limits(generous_limits()).await
}

/// Requests are keyed on a fixed peer address, as if the service were exposed directly.
pub async fn create_test_app_with_limits(limits: RateLimits) -> (Router, Database, KeyPair) {
    let mut config = auth_config(limits).await;
    config.ip_extractor = IpExtractor::Socket;
    let app = create_auth_app(&config).layer(Extension(ConnectInfo(SocketAddr::from((
        [127, 0, 0, 1],
        40000,
    )))));
    (app, config.db, config.keys)
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_with_refresh_cookie(uri: &str, refresh_token: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::COOKIE, format!("refresh_token={}", refresh_token))
        .body(Body::empty())
        .unwrap()
}

pub fn credentials() -> Value {
    serde_json::json!({ "email": EMAIL, "password": PASSWORD })
}

/// The raw Set-Cookie header for the refresh token, if any.
pub fn refresh_set_cookie<B>(response: &Response<B>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("refresh_token="))
        .map(str::to_string)
}

/// The refresh token value from Set-Cookie, if a non-empty one was set.
pub fn refresh_token_from<B>(response: &Response<B>) -> Option<String> {
    let cookie = refresh_set_cookie(response)?;
    let value = cookie
        .strip_prefix("refresh_token=")?
        .split(';')
        .next()?
        .to_string();
    (!value.is_empty()).then_some(value)
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Backend stand-in that echoes what the gateway forwarded.
#[derive(Clone)]
struct MockBackend {
    secret: Option<String>,
}

impl HasGatewaySecret for MockBackend {
    fn gateway_secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }
}

async fn echo(
    State(_state): State<MockBackend>,
    TrustedPrincipal(user_id): TrustedPrincipal,
    method: Method,
    uri: Uri,
    body: String,
) -> Json<Value> {
    Json(serde_json::json!({
        "user_id": user_id,
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "body": body,
    }))
}

/// Start a mock backend on a random port. Returns its base URL.
pub async fn start_mock_backend(secret: Option<&str>) -> Url {
    let state = MockBackend {
        secret: secret.map(str::to_string),
    };
    let app = Router::new().fallback(echo).with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    Url::parse(&format!("http://{}", addr)).unwrap()
}

/// A URL on a port nothing is listening on.
pub async fn dead_url() -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Url::parse(&format!("http://{}", addr)).unwrap()
}

pub struct Stack {
    pub gateway: String,
    pub backend: Url,
    pub db: Database,
    pub client: reqwest::Client,
}

impl Stack {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.gateway, path)
    }

    /// A client whose connections originate from the given loopback address.
    pub fn client_from(&self, last_octet: u8) -> reqwest::Client {
        reqwest::Client::builder()
            .local_address(std::net::IpAddr::from([127, 0, 0, last_octet]))
            .build()
            .unwrap()
    }

    /// Sign up through the gateway and return (access_token, refresh_token).
    pub async fn signup(&self) -> (String, String) {
        let response = self
            .client
            .post(self.url("/api/auth/signup"))
            .json(&credentials())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);

        let refresh = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| v.strip_prefix("refresh_token="))
            .and_then(|v| v.split(';').next())
            .unwrap()
            .to_string();
        let body: Value = response.json().await.unwrap();
        let access = body["access_token"].as_str().unwrap().to_string();
        (access, refresh)
    }
}

/// Start auth service, a mock backend serving both protected prefixes, and a gateway.
pub async fn start_stack(secret: Option<&str>) -> Stack {
    start_stack_with_limits(secret, generous_limits()).await
}

pub async fn start_stack_with_limits(secret: Option<&str>, limits: RateLimits) -> Stack {
    let config = auth_config(limits).await;
    let db = config.db.clone();
    let (_auth_handle, auth_addr) = start_auth_server(config, 0).await;

    let backend = start_mock_backend(secret).await;

    let gateway_config = GatewayConfig {
        auth_url: Url::parse(&format!("http://{}/api/auth", auth_addr)).unwrap(),
        shortener_url: backend.clone(),
        redirect_url: backend.clone(),
        public_key_url: None,
        key_cache_ttl: Duration::ZERO,
        upstream_timeout: Duration::from_secs(5),
        gateway_secret: secret.map(str::to_string),
    };
    let (_gateway_handle, gateway_addr) = start_gateway(gateway_config, 0).await;

    Stack {
        gateway: format!("http://{}", gateway_addr),
        backend,
        db,
        client: reqwest::Client::new(),
    }
}
