pub mod api;
pub mod auth;
pub mod backend;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod gateway;
pub mod jwt;
pub mod keys;
pub mod password;
pub mod rate_limit;
pub mod session;

use api::create_auth_router;
use axum::Router;
use db::Database;
use gateway::{AUTH_PREFIX, GatewayConfig, create_gateway_router};
use keys::KeyPair;
use rate_limit::{RateLimitConfig, RateLimits};
use session::SessionManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;

pub struct AuthServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Signing keypair, loaded once at startup
    pub keys: KeyPair,
    /// Whether to set Secure flag on cookies (should be true in production with HTTPS)
    pub secure_cookies: bool,
    /// bcrypt cost for new passwords
    pub bcrypt_cost: u32,
    pub rate_limits: RateLimits,
    /// Where rate limiting reads the client IP from
    pub ip_extractor: auth::IpExtractor,
}

/// Create the auth service router with the given configuration.
pub fn create_auth_app(config: &AuthServerConfig) -> Router {
    let sessions = SessionManager::new(config.db.clone(), config.keys.clone(), config.bcrypt_cost);
    let rate_limit_config = Arc::new(RateLimitConfig::new(
        config.rate_limits,
        config.ip_extractor,
    ));

    Router::new()
        .nest(
            AUTH_PREFIX,
            create_auth_router(sessions, config.secure_cookies, rate_limit_config),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Create the gateway router.
pub fn create_gateway_app(config: &GatewayConfig) -> Result<Router, reqwest::Error> {
    create_gateway_router(config)
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the auth server.
pub async fn init_cleanup(db: &Database) {
    cleanup::run_cleanup(db).await;
    cleanup::spawn_cleanup_scheduler(db.clone());
}

/// Resolves when the process receives Ctrl-C.
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}

async fn serve(app: Router, listener: TcpListener) -> Result<(), std::io::Error> {
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

/// Run the auth server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_auth_server(
    config: AuthServerConfig,
    listener: TcpListener,
) -> Result<(), std::io::Error> {
    serve(create_auth_app(&config), listener).await
}

/// Run the gateway on the given listener. This function blocks until the server exits.
pub async fn run_gateway(config: GatewayConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_gateway_app(&config).map_err(std::io::Error::other)?;
    serve(app, listener).await
}

/// Start the auth server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_auth_server` directly in main.
pub async fn start_auth_server(
    config: AuthServerConfig,
    port: u16,
) -> (tokio::task::JoinHandle<()>, SocketAddr) {
    init_cleanup(&config.db).await;

    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
    let local_addr = listener.local_addr().expect("Failed to get local address");

    let handle = tokio::spawn(async move {
        run_auth_server(config, listener).await.ok();
    });

    (handle, local_addr)
}

/// Start the gateway on the given port in a background task. Use port 0 to let the OS choose a random port.
pub async fn start_gateway(
    config: GatewayConfig,
    port: u16,
) -> (tokio::task::JoinHandle<()>, SocketAddr) {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
    let local_addr = listener.local_addr().expect("Failed to get local address");

    let handle = tokio::spawn(async move {
        run_gateway(config, listener).await.ok();
    });

    (handle, local_addr)
}
