//! wardbus daemon - session gate and live event router

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wardbus::auth::SigningSecret;
use wardbus::server::{ServerConfig, WardbusServer};
use wardbus::storage::{PostgresConfig, PostgresStore};

#[derive(Parser)]
#[command(name = "wardbusd")]
#[command(about = "wardbus session and event routing daemon")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080", env = "WARDBUS_BIND")]
    bind: String,

    /// Credential signing secret
    #[arg(long, env = "WARDBUS_SECRET", hide_env_values = true)]
    secret: String,

    /// Database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Credential lifetime in seconds
    #[arg(long, default_value_t = 3600, env = "WARDBUS_SESSION_TTL")]
    session_ttl: u64,

    /// Seconds between sweeps of expired revocation markers
    #[arg(long, default_value_t = 60, env = "WARDBUS_SWEEP_INTERVAL")]
    sweep_interval: u64,

    /// Outbound queue depth per connection
    #[arg(long, default_value_t = 100, env = "WARDBUS_QUEUE_DEPTH")]
    queue_depth: usize,

    /// Mark session cookies Secure
    #[arg(long, env = "WARDBUS_SECURE_COOKIES")]
    secure_cookies: bool,

    /// Seconds a socket without a header credential may wait for its auth message
    #[arg(long, default_value_t = 10, env = "WARDBUS_AUTH_TIMEOUT")]
    auth_timeout: u64,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    run_server(args).await
}

async fn run_server(args: Args) -> Result<()> {
    let db_config =
        PostgresConfig::from_url(&args.database_url).context("Invalid DATABASE_URL")?;

    // One Postgres pool backs both the ledger and account lookups
    let store = Arc::new(PostgresStore::new(db_config).await?);

    let bind_addr = args.bind.parse().context("Invalid bind address")?;

    let mut config = ServerConfig::new(bind_addr, SigningSecret::new(args.secret.into_bytes()));
    config.session_ttl = Duration::from_secs(args.session_ttl);
    config.sweep_interval = Duration::from_secs(args.sweep_interval);
    config.queue_depth = args.queue_depth;
    config.secure_cookies = args.secure_cookies;
    config.auth_timeout = Duration::from_secs(args.auth_timeout);

    let server = WardbusServer::new(config, store.clone(), store);

    info!(addr = %args.bind, "wardbus daemon starting");

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server");
        }
    }

    info!(
        connections = server.connection_count(),
        "wardbus daemon stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
