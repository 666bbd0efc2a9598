//! Error responses for the auth endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::session::SessionError;

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum AuthApiError {
    BadRequest(String),
    Unauthorized(String),
    /// Details are logged, never sent to the client.
    Internal,
}

impl AuthApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SessionError> for AuthApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Validation(msg) => Self::BadRequest(msg),
            SessionError::InvalidCredentials => Self::unauthorized("Invalid email or password"),
            SessionError::MissingToken => Self::unauthorized("No refresh token"),
            SessionError::BadToken(_) => Self::bad_request("Invalid refresh token"),
            SessionError::Replay => Self::bad_request("Refresh token has been revoked"),
            SessionError::Upstream { context, message } => {
                error!(error = %message, "{}", context);
                Self::Internal
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AuthApiError::BadRequest(msg) | AuthApiError::Unauthorized(msg) => msg,
            AuthApiError::Internal => "Internal server error".to_string(),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::TokenError;

    #[test]
    fn test_session_error_statuses() {
        let cases = [
            (SessionError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (SessionError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (SessionError::MissingToken, StatusCode::UNAUTHORIZED),
            (SessionError::BadToken(TokenError::Expired), StatusCode::BAD_REQUEST),
            (SessionError::Replay, StatusCode::BAD_REQUEST),
            (
                SessionError::Upstream {
                    context: "db",
                    message: "disk on fire".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AuthApiError::from(err).status(), status);
        }
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let err = AuthApiError::from(SessionError::Upstream {
            context: "db",
            message: "secret detail".into(),
        });
        let response = err.into_response();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(!body.contains("secret detail"));
        assert!(body.contains("Internal server error"));
    }
}
