//! Gateway trust verifier.
//!
//! Protected routes require a valid access token. The auth service's public key
//! is fetched over HTTP (optionally cached for a short TTL), the bearer token is
//! verified against it, and the token subject is attached to the request as an
//! [`AuthenticatedPrincipal`] for the proxy to forward.
//!
//! The revocation ledger is not consulted here. A logged-out access token stays
//! usable at the gateway until it expires (at most 15 minutes).

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use super::GatewayError;
use crate::jwt::{TokenKind, TokenVerifier};

/// Query parameter accepted as an alternative to the Authorization header.
pub const ACCESS_TOKEN_QUERY_PARAM: &str = "access_token";

/// Largest public key response accepted.
const MAX_KEY_BYTES: usize = 16 * 1024;

/// Verified user ID, stored in request extensions by [`verify_access_token`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    pub user_id: String,
}

struct CachedKey {
    verifier: TokenVerifier,
    fetched_at: Instant,
}

/// Fetches the auth service's public key.
///
/// With a zero TTL every call goes to the network.
pub struct PublicKeySource {
    client: reqwest::Client,
    url: Url,
    ttl: Duration,
    cached: RwLock<Option<CachedKey>>,
}

impl PublicKeySource {
    pub fn new(client: reqwest::Client, url: Url, ttl: Duration) -> Self {
        Self {
            client,
            url,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Get a verifier for the current public key.
    pub async fn verifier(&self) -> Result<TokenVerifier, GatewayError> {
        if self.ttl.is_zero() {
            return self.fetch().await;
        }

        if let Some(cached) = self.cached.read().await.as_ref()
            && cached.fetched_at.elapsed() < self.ttl
        {
            return Ok(cached.verifier.clone());
        }

        let verifier = self.fetch().await?;
        *self.cached.write().await = Some(CachedKey {
            verifier: verifier.clone(),
            fetched_at: Instant::now(),
        });
        Ok(verifier)
    }

    async fn fetch(&self) -> Result<TokenVerifier, GatewayError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| GatewayError::KeyFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::KeyFetch(format!(
                "public key endpoint returned {}",
                status
            )));
        }
        if response
            .content_length()
            .is_some_and(|len| len > MAX_KEY_BYTES as u64)
        {
            return Err(GatewayError::KeyFetch("public key response too large".into()));
        }

        let pem = response
            .bytes()
            .await
            .map_err(|e| GatewayError::KeyFetch(e.to_string()))?;
        if pem.len() > MAX_KEY_BYTES {
            return Err(GatewayError::KeyFetch("public key response too large".into()));
        }

        debug!(url = %self.url, "Fetched public key");
        TokenVerifier::from_public_pem(&pem).map_err(|e| GatewayError::KeyParse(e.to_string()))
    }
}

/// State for the [`verify_access_token`] middleware.
#[derive(Clone)]
pub struct VerifierState {
    pub keys: Arc<PublicKeySource>,
}

/// Take the bearer token from `Authorization: Bearer <token>`, falling back to
/// the `access_token` query parameter.
pub fn extract_bearer_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, token) = v.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    from_header.or_else(|| {
        url::form_urlencoded::parse(query?.as_bytes())
            .find(|(key, _)| key == ACCESS_TOKEN_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())
            .filter(|t| !t.is_empty())
    })
}

/// Middleware: verify the access token and attach the principal.
pub async fn verify_access_token(
    State(state): State<VerifierState>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let token = extract_bearer_token(request.headers(), request.uri().query())
        .ok_or(GatewayError::MissingToken)?;

    let verifier = state.keys.verifier().await?;
    let claims = verifier.verify(&token, TokenKind::Access).map_err(|e| {
        warn!(error = %e, path = %request.uri().path(), "Rejected access token");
        GatewayError::InvalidToken(e)
    })?;

    debug!(user_id = %claims.sub, "Verified access token");
    request.extensions_mut().insert(AuthenticatedPrincipal {
        user_id: claims.sub,
    });

    Ok(next.run(request).await)
}
