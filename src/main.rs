use clap::Parser;
use linkgate::cli::{
    Args, AuthArgs, Command, GatewayArgs, build_auth_config, build_gateway_config, init_logging,
    load_gateway_secret, load_keys, open_database, run_keygen,
};
use linkgate::{init_cleanup, run_auth_server, run_gateway};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    match args.command {
        Command::Auth(auth) => run_auth(auth).await,
        Command::Gateway(gateway) => run_gateway_command(gateway).await,
        Command::Keygen(keygen) => {
            if !run_keygen(&keygen) {
                std::process::exit(1);
            }
        }
    }
}

async fn bind(port: u16) -> TcpListener {
    let addr = format!("0.0.0.0:{}", port);
    TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        error!(address = %addr, error = %e, "Failed to bind");
        std::process::exit(1);
    })
}

async fn run_auth(args: AuthArgs) {
    let Some(keys) = load_keys(&args.private_key, &args.public_key) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    init_cleanup(&db).await;

    let listener = bind(args.port).await;
    if let Ok(local_addr) = listener.local_addr() {
        info!(address = %local_addr, "Auth service listening");
    }

    let config = build_auth_config(&args, db, keys);
    if let Err(e) = run_auth_server(config, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn run_gateway_command(args: GatewayArgs) {
    let Ok(gateway_secret) = load_gateway_secret(args.gateway_secret_file.as_deref()) else {
        std::process::exit(1);
    };

    let Some(config) = build_gateway_config(&args, gateway_secret) else {
        std::process::exit(1);
    };

    let listener = bind(args.port).await;
    if let Ok(local_addr) = listener.local_addr() {
        info!(
            address = %local_addr,
            auth = %config.auth_url,
            shortener = %config.shortener_url,
            redirect = %config.redirect_url,
            "Gateway listening"
        );
    }

    if let Err(e) = run_gateway(config, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
