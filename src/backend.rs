//! Trust boundary for internal services sitting behind the gateway.
//!
//! A backend accepts `X-User-ID` only when the request also carries the
//! gateway's shared secret. Without a configured secret the header is trusted
//! on network topology alone.

use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::gateway::{GATEWAY_SECRET_HEADER, USER_ID_HEADER};

/// Implemented by backend state types to expose the expected gateway secret.
pub trait HasGatewaySecret {
    fn gateway_secret(&self) -> Option<&str>;
}

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("request did not come through the gateway")]
    UntrustedSource,
    #[error("missing user ID")]
    MissingUser,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for TrustError {
    fn into_response(self) -> Response {
        let status = match self {
            TrustError::UntrustedSource => StatusCode::FORBIDDEN,
            TrustError::MissingUser => StatusCode::UNAUTHORIZED,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// The user the gateway verified for this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedPrincipal(pub String);

impl<S> FromRequestParts<S> for TrustedPrincipal
where
    S: HasGatewaySecret + Send + Sync,
{
    type Rejection = TrustError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(expected) = state.gateway_secret() {
            let presented = parts
                .headers
                .get(GATEWAY_SECRET_HEADER)
                .map(|v| v.as_bytes())
                .unwrap_or_default();
            if !secrets_match(presented, expected.as_bytes()) {
                warn!(path = %parts.uri.path(), "Request without valid gateway secret");
                return Err(TrustError::UntrustedSource);
            }
        }

        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(TrustError::MissingUser)?;

        Ok(TrustedPrincipal(user_id.to_string()))
    }
}

/// Constant-time comparison. `memcmp::eq` panics on length mismatch, so
/// lengths are checked first.
fn secrets_match(presented: &[u8], expected: &[u8]) -> bool {
    presented.len() == expected.len() && openssl::memcmp::eq(presented, expected)
}
