//! API gateway: the trust boundary between clients and internal services.
//!
//! - `/api/auth` is proxied to the auth service without verification
//! - `/api/shorten` and `/api/redirect` require a valid access token

pub mod proxy;
pub mod verifier;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::error;
use url::Url;

use crate::jwt::TokenError;
pub use proxy::{GATEWAY_SECRET_HEADER, ProxyTarget, USER_ID_HEADER, single_joining_slash};
pub use verifier::{AuthenticatedPrincipal, PublicKeySource, VerifierState};

pub const AUTH_PREFIX: &str = "/api/auth";
pub const SHORTEN_PREFIX: &str = "/api/shorten";
pub const REDIRECT_PREFIX: &str = "/api/redirect";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing access token")]
    MissingToken,
    #[error("invalid access token: {0}")]
    InvalidToken(TokenError),
    #[error("failed to fetch public key: {0}")]
    KeyFetch(String),
    #[error("failed to parse public key: {0}")]
    KeyParse(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("request body too large")]
    PayloadTooLarge,
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingToken | GatewayError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            GatewayError::KeyFetch(_) | GatewayError::KeyParse(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            GatewayError::MissingToken | GatewayError::InvalidToken(_) => "Unauthorized".to_string(),
            GatewayError::KeyFetch(_) | GatewayError::KeyParse(_) => {
                error!(error = %self, "Cannot verify access tokens");
                "Internal server error".to_string()
            }
            GatewayError::BadRequest(msg) => msg.clone(),
            GatewayError::PayloadTooLarge => "Request body too large".to_string(),
            GatewayError::Upstream(_) => "Bad gateway".to_string(),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Backend locations and trust settings for the gateway.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Auth service base URL, including its `/api/auth` mount path
    pub auth_url: Url,
    pub shortener_url: Url,
    pub redirect_url: Url,
    /// Where to fetch the public key. Defaults to `{auth_url}/public.pem`.
    pub public_key_url: Option<Url>,
    /// How long a fetched public key is reused. Zero fetches on every request.
    pub key_cache_ttl: Duration,
    /// Timeout for every outbound request
    pub upstream_timeout: Duration,
    /// Sent to backends as `X-Gateway-Secret`
    pub gateway_secret: Option<String>,
}

impl GatewayConfig {
    pub fn public_key_url(&self) -> Url {
        match &self.public_key_url {
            Some(url) => url.clone(),
            None => {
                let mut url = self.auth_url.clone();
                url.set_path(&single_joining_slash(self.auth_url.path(), "public.pem"));
                url
            }
        }
    }
}

/// Create the gateway router.
pub fn create_gateway_router(config: &GatewayConfig) -> Result<Router, reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(config.upstream_timeout)
        .build()?;
    let secret: Option<Arc<str>> = config.gateway_secret.as_deref().map(Arc::from);

    let verifier_state = VerifierState {
        keys: Arc::new(PublicKeySource::new(
            client.clone(),
            config.public_key_url(),
            config.key_cache_ttl,
        )),
    };

    let public_routes =
        ProxyTarget::new(AUTH_PREFIX, config.auth_url.clone(), client.clone(), secret.clone())
            .router();

    let protected_routes = Router::new()
        .merge(
            ProxyTarget::new(
                SHORTEN_PREFIX,
                config.shortener_url.clone(),
                client.clone(),
                secret.clone(),
            )
            .router(),
        )
        .merge(
            ProxyTarget::new(REDIRECT_PREFIX, config.redirect_url.clone(), client, secret)
                .router(),
        )
        .layer(middleware::from_fn_with_state(
            verifier_state,
            verifier::verify_access_token,
        ));

    Ok(Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http()))
}
