//! CLI argument parsing, validation, and startup helpers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use url::Url;

use crate::auth::IpExtractor;
use crate::db::Database;
use crate::gateway::GatewayConfig;
use crate::keys::KeyPair;
use crate::rate_limit::RateLimits;
use crate::{AuthServerConfig, password};

const MIN_GATEWAY_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "linkgate",
    about = "Auth service and API gateway for the URL shortener"
)]
pub struct Args {
    /// Log output format
    #[arg(short, long, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the auth service
    Auth(AuthArgs),
    /// Run the API gateway
    Gateway(GatewayArgs),
    /// Generate an Ed25519 signing keypair
    Keygen(KeygenArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct AuthArgs {
    /// Port to listen on
    #[arg(short, long, env = "AUTH_PORT", default_value = "8080")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "linkgate.db")]
    pub database: String,

    /// PKCS#8 PEM private key used to sign tokens
    #[arg(long, env = "PRIVATE_KEY_PATH", default_value = "private_key.pem")]
    pub private_key: PathBuf,

    /// PEM public key served at /api/auth/public.pem
    #[arg(long, env = "PUBLIC_KEY_PATH", default_value = "public_key.pem")]
    pub public_key: PathBuf,

    /// Set the Secure flag on the refresh token cookie
    #[arg(long, env = "SECURE_COOKIES")]
    pub secure_cookies: bool,

    /// bcrypt cost factor for new passwords
    #[arg(long, default_value_t = password::DEFAULT_COST,
        value_parser = clap::value_parser!(u32).range(4..=31))]
    pub bcrypt_cost: u32,

    /// Where to read the client IP from for rate limiting. Use `socket` only
    /// when the auth service is reachable without the gateway
    #[arg(long, env = "IP_SOURCE", value_enum, default_value_t = IpExtractor::XForwardedFor)]
    pub ip_source: IpExtractor,

    /// Sustained login attempts per minute per IP
    #[arg(long, default_value = "10")]
    pub login_per_minute: u32,

    /// Login attempts allowed in a burst per IP
    #[arg(long, default_value = "5")]
    pub login_burst: u32,

    /// Signups per hour per IP
    #[arg(long, default_value = "10")]
    pub signup_per_hour: u32,
}

#[derive(clap::Args, Debug, Clone)]
pub struct GatewayArgs {
    /// Port to listen on
    #[arg(short, long, env = "GATEWAY_PORT", default_value = "8000")]
    pub port: u16,

    /// Auth service base URL, including its /api/auth mount path
    #[arg(long, env = "AUTH_URL", default_value = "http://localhost:8080/api/auth")]
    pub auth_url: String,

    /// Shortener service base URL
    #[arg(long, env = "SHORTENER_URL", default_value = "http://localhost:8081")]
    pub shortener_url: String,

    /// Redirect service base URL
    #[arg(long, env = "REDIRECT_URL", default_value = "http://localhost:8082")]
    pub redirect_url: String,

    /// Public key URL (default: {auth-url}/public.pem)
    #[arg(long, env = "PUBLIC_KEY_URL")]
    pub public_key_url: Option<String>,

    /// Seconds to reuse a fetched public key; 0 fetches on every request
    #[arg(long, default_value = "0")]
    pub key_cache_ttl_secs: u64,

    /// Timeout in seconds for requests to the auth service and backends
    #[arg(long, default_value = "10")]
    pub upstream_timeout_secs: u64,

    /// Path to file containing the gateway secret. Prefer the GATEWAY_SECRET env var instead
    #[arg(long)]
    pub gateway_secret_file: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct KeygenArgs {
    /// Where to write the private key
    #[arg(long, default_value = "private_key.pem")]
    pub private_key: PathBuf,

    /// Where to write the public key
    #[arg(long, default_value = "public_key.pem")]
    pub public_key: PathBuf,

    /// Overwrite existing key files
    #[arg(long)]
    pub force: bool,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load the signing keypair.
/// Returns None and logs an error if the keys cannot be loaded.
pub fn load_keys(private_path: &Path, public_path: &Path) -> Option<KeyPair> {
    match KeyPair::load(private_path, public_path) {
        Ok(keys) => {
            info!(public_key = %public_path.display(), "Signing keys loaded");
            Some(keys)
        }
        Err(e) => {
            error!(error = %e, "Failed to load signing keys. Generate them with `linkgate keygen`");
            None
        }
    }
}

/// Handle the keygen subcommand. Returns false on failure.
pub fn run_keygen(args: &KeygenArgs) -> bool {
    if !args.force {
        for path in [&args.private_key, &args.public_key] {
            if path.exists() {
                error!(path = %path.display(), "Key file already exists. Use --force to overwrite");
                return false;
            }
        }
    }

    match KeyPair::generate_to_files(&args.private_key, &args.public_key) {
        Ok(()) => {
            println!();
            println!("Private key: {}", args.private_key.display());
            println!("Public key:  {}", args.public_key.display());
            println!();
            true
        }
        Err(e) => {
            error!(error = %e, "Failed to generate keys");
            false
        }
    }
}

/// Load the gateway secret from environment variable or file.
/// A missing secret is allowed; a short or unreadable one is not.
/// Returns Err(()) after logging if the secret is unusable.
pub fn load_gateway_secret(secret_file: Option<&str>) -> Result<Option<String>, ()> {
    let secret = if let Ok(secret) = std::env::var("GATEWAY_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("GATEWAY_SECRET") };
        secret
    } else if let Some(path) = secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read gateway secret file");
                return Err(());
            }
        }
    } else {
        warn!("No gateway secret configured. Backends will trust X-User-ID on network topology alone");
        return Ok(None);
    };

    if secret.len() < MIN_GATEWAY_SECRET_LENGTH {
        error!(
            "Gateway secret is shorter than {} characters. Use a longer secret",
            MIN_GATEWAY_SECRET_LENGTH
        );
        return Err(());
    }

    Ok(Some(secret))
}

/// Parse and validate a service URL.
/// Returns None and logs an error if validation fails.
pub fn parse_service_url(name: &str, value: &str) -> Option<Url> {
    let url = match Url::parse(value) {
        Ok(url) => url,
        Err(e) => {
            error!(service = %name, url = %value, error = %e, "Invalid service URL");
            return None;
        }
    };

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        error!(service = %name, url = %value, "Service URL must be http(s) with a host");
        return None;
    }

    Some(url)
}

/// Build AuthServerConfig from validated arguments.
pub fn build_auth_config(args: &AuthArgs, db: Database, keys: KeyPair) -> AuthServerConfig {
    AuthServerConfig {
        db,
        keys,
        secure_cookies: args.secure_cookies,
        bcrypt_cost: args.bcrypt_cost,
        rate_limits: RateLimits {
            login_per_minute: args.login_per_minute,
            login_burst: args.login_burst,
            signup_per_hour: args.signup_per_hour,
        },
        ip_extractor: args.ip_source,
    }
}

/// Build GatewayConfig from arguments.
/// Returns None and logs an error if any URL is invalid.
pub fn build_gateway_config(
    args: &GatewayArgs,
    gateway_secret: Option<String>,
) -> Option<GatewayConfig> {
    let public_key_url = match &args.public_key_url {
        Some(url) => Some(parse_service_url("public-key", url)?),
        None => None,
    };

    Some(GatewayConfig {
        auth_url: parse_service_url("auth", &args.auth_url)?,
        shortener_url: parse_service_url("shortener", &args.shortener_url)?,
        redirect_url: parse_service_url("redirect", &args.redirect_url)?,
        public_key_url,
        key_cache_ttl: Duration::from_secs(args.key_cache_ttl_secs),
        upstream_timeout: Duration::from_secs(args.upstream_timeout_secs),
        gateway_secret,
    })
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
