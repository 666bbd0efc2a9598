//! Auth session endpoints.
//!
//! - GET `/public.pem` - Public key for token verification
//! - POST `/login` - Exchange credentials for tokens
//! - POST `/signup` - Create a user and log in
//! - POST `/logout` - Revoke the refresh token cookie
//! - POST `/refresh` - Rotate the refresh token cookie

use axum::{
    Form, Json, Router,
    extract::{FromRequest, Request, State},
    http::{
        HeaderMap, StatusCode,
        header::{CONTENT_TYPE, SET_COOKIE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::AuthApiError;
use crate::auth::{REFRESH_COOKIE_NAME, clear_refresh_cookie, get_cookie, refresh_cookie};
use crate::jwt::now_secs;
use crate::rate_limit::{RateLimitConfig, rate_limit_login, rate_limit_signup};
use crate::session::{SessionManager, TokenPair};

#[derive(Clone)]
pub struct AuthState {
    pub sessions: SessionManager,
    pub secure_cookies: bool,
}

pub fn router(state: AuthState, rate_limit_config: Arc<RateLimitConfig>) -> Router {
    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            rate_limit_config.clone(),
            rate_limit_login,
        ));

    let signup_router = Router::new()
        .route("/signup", post(signup))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            rate_limit_config,
            rate_limit_signup,
        ));

    Router::new()
        .route("/public.pem", get(public_key))
        .route("/logout", post(logout))
        .route("/refresh", post(refresh))
        .with_state(state)
        .merge(login_router)
        .merge(signup_router)
}

/// Login/signup body. Accepted as JSON or as a urlencoded form.
#[derive(Deserialize)]
pub struct Credentials {
    email: String,
    password: String,
}

impl<S: Send + Sync> FromRequest<S> for Credentials {
    type Rejection = AuthApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(credentials) = Form::<Credentials>::from_request(req, state)
                .await
                .map_err(|e| AuthApiError::bad_request(e.body_text()))?;
            Ok(credentials)
        } else {
            let Json(credentials) = Json::<Credentials>::from_request(req, state)
                .await
                .map_err(|e| AuthApiError::bad_request(e.body_text()))?;
            Ok(credentials)
        }
    }
}

#[derive(Serialize)]
struct AccessTokenResponse {
    access_token: String,
}

async fn public_key(State(state): State<AuthState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "application/x-pem-file")],
        state.sessions.public_key_pem().to_vec(),
    )
}

async fn login(
    State(state): State<AuthState>,
    credentials: Credentials,
) -> Result<Response, AuthApiError> {
    let pair = state
        .sessions
        .login(&credentials.email, &credentials.password)
        .await?;
    token_response(StatusCode::OK, &pair, state.secure_cookies)
}

async fn signup(
    State(state): State<AuthState>,
    credentials: Credentials,
) -> Result<Response, AuthApiError> {
    let pair = state
        .sessions
        .signup(&credentials.email, &credentials.password)
        .await?;
    token_response(StatusCode::CREATED, &pair, state.secure_cookies)
}

/// The refresh cookie is cleared whatever the outcome.
async fn logout(State(state): State<AuthState>, headers: HeaderMap) -> Response {
    let token = get_cookie(&headers, REFRESH_COOKIE_NAME);
    let clear = clear_refresh_cookie(state.secure_cookies);

    match state.sessions.logout(token).await {
        Ok(()) => (
            StatusCode::OK,
            [(SET_COOKIE, clear)],
            Json(serde_json::json!({ "success": true })),
        )
            .into_response(),
        Err(e) => ([(SET_COOKIE, clear)], AuthApiError::from(e)).into_response(),
    }
}

/// Rotate the refresh token. Any failure clears the cookie.
async fn refresh(State(state): State<AuthState>, headers: HeaderMap) -> Response {
    let token = get_cookie(&headers, REFRESH_COOKIE_NAME);

    let result = match state.sessions.refresh(token).await {
        Ok(pair) => token_response(StatusCode::OK, &pair, state.secure_cookies),
        Err(e) => Err(AuthApiError::from(e)),
    };

    match result {
        Ok(response) => response,
        Err(e) => (
            [(SET_COOKIE, clear_refresh_cookie(state.secure_cookies))],
            e,
        )
            .into_response(),
    }
}

fn token_response(
    status: StatusCode,
    pair: &TokenPair,
    secure_cookies: bool,
) -> Result<Response, AuthApiError> {
    let now = now_secs().map_err(|e| {
        tracing::error!(error = %e, "Clock error while setting cookie");
        AuthApiError::Internal
    })?;
    let cookie = refresh_cookie(&pair.refresh, now, secure_cookies);

    Ok((
        status,
        [(SET_COOKIE, cookie)],
        Json(AccessTokenResponse {
            access_token: pair.access.token.clone(),
        }),
    )
        .into_response())
}
