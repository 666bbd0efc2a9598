//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down password
//! guessing and signup spam.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::auth::{IpExtractor, extract_client_ip};

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Request budgets for the auth endpoints.
#[derive(Clone, Copy, Debug)]
pub struct RateLimits {
    /// Sustained login attempts per minute per IP
    pub login_per_minute: u32,
    /// Login attempts allowed in a burst
    pub login_burst: u32,
    /// Signups per hour per IP
    pub signup_per_hour: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            login_per_minute: 10,
            login_burst: 5,
            signup_per_hour: 10,
        }
    }
}

/// Rate limiting state for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    pub login: Arc<IpLimiter>,
    pub signup: Arc<IpLimiter>,
    pub ip_extractor: IpExtractor,
}

impl RateLimitConfig {
    pub fn new(limits: RateLimits, ip_extractor: IpExtractor) -> Self {
        let login_per_minute = NonZeroU32::new(limits.login_per_minute).unwrap_or(NonZeroU32::MIN);
        let login_burst = NonZeroU32::new(limits.login_burst).unwrap_or(NonZeroU32::MIN);
        let signup_per_hour = NonZeroU32::new(limits.signup_per_hour).unwrap_or(NonZeroU32::MIN);

        // Quota::with_period only fails for a zero period.
        let signup_quota = Quota::with_period(std::time::Duration::from_secs(3600) / signup_per_hour.get())
            .unwrap_or_else(|| Quota::per_minute(NonZeroU32::MIN))
            .allow_burst(signup_per_hour);

        Self {
            login: Arc::new(RateLimiter::keyed(
                Quota::per_minute(login_per_minute).allow_burst(login_burst),
            )),
            signup: Arc::new(RateLimiter::keyed(signup_quota)),
            ip_extractor,
        }
    }
}

async fn check(
    limiter: &IpLimiter,
    ip_extractor: IpExtractor,
    message: &'static str,
    request: Request,
    next: Next,
) -> Response {
    let ip = match extract_client_ip(&request, ip_extractor) {
        Ok(ip) => ip,
        Err(e) => {
            warn!(error = e, "Rejecting request without client IP");
            return (StatusCode::FORBIDDEN, "Unable to determine client IP.").into_response();
        }
    };

    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
            (StatusCode::TOO_MANY_REQUESTS, message).into_response()
        }
    }
}

/// Middleware for rate limiting login.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config.login,
        config.ip_extractor,
        "Too many login attempts. Please wait before trying again.",
        request,
        next,
    )
    .await
}

/// Middleware for rate limiting signup.
pub async fn rate_limit_signup(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config.signup,
        config.ip_extractor,
        "Too many signup attempts. Please wait before trying again.",
        request,
        next,
    )
    .await
}
