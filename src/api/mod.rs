mod auth;
pub mod error;

use axum::Router;
use std::sync::Arc;

use crate::rate_limit::RateLimitConfig;
use crate::session::SessionManager;

pub use auth::{AuthState, Credentials};
pub use error::AuthApiError;

/// Create the auth API router. Mount it at `/api/auth`.
pub fn create_auth_router(
    sessions: SessionManager,
    secure_cookies: bool,
    rate_limit_config: Arc<RateLimitConfig>,
) -> Router {
    let state = AuthState {
        sessions,
        secure_cookies,
    };
    auth::router(state, rate_limit_config)
}
