//! wardbus CLI entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wardbus::auth::{CredentialCodec, CredentialError, RevocationLedger, SigningSecret};
use wardbus::server::{ServerConfig, WardbusServer};
use wardbus::storage::{PostgresConfig, PostgresStore};
use wardbus::Role;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Database and secret are only resolved for commands that need them
    let get_db_config = || -> Result<PostgresConfig> {
        if let Some(url) = &cli.database_url {
            PostgresConfig::from_url(url).context("Invalid DATABASE_URL")
        } else {
            PostgresConfig::from_env().context("DATABASE_URL not set")
        }
    };
    let get_secret = || -> Result<SigningSecret> {
        cli.secret
            .as_ref()
            .map(|s| SigningSecret::new(s.as_bytes()))
            .context("--secret or WARDBUS_SECRET is required")
    };

    match &cli.command {
        Commands::Serve {
            bind,
            session_ttl,
            sweep_interval,
            queue_depth,
            secure_cookies,
            auth_timeout,
        } => {
            let mut config = ServerConfig::new(
                bind.parse().context("Invalid bind address")?,
                get_secret()?,
            );
            config.session_ttl = Duration::from_secs(*session_ttl);
            config.sweep_interval = Duration::from_secs(*sweep_interval);
            config.queue_depth = *queue_depth;
            config.secure_cookies = *secure_cookies;
            config.auth_timeout = Duration::from_secs(*auth_timeout);
            serve(get_db_config()?, config).await
        }
        Commands::Issue { subject, role, ttl } => issue(get_secret()?, subject, role, *ttl),
        Commands::Verify { token } => verify(get_secret()?, token),
        Commands::Revoke { token } => revoke(get_db_config()?, get_secret()?, token).await,
        Commands::Purge => purge(get_db_config()?).await,
        Commands::Init => init(get_db_config()?).await,
        Commands::Status => status(get_db_config()?).await,
    }
}

async fn serve(db_config: PostgresConfig, config: ServerConfig) -> Result<()> {
    let store = Arc::new(PostgresStore::new(db_config).await?);
    let server = WardbusServer::new(config, store.clone(), store);

    info!("Starting wardbus server...");
    server.run().await?;

    Ok(())
}

fn issue(secret: SigningSecret, subject: &str, role: &str, ttl: u64) -> Result<()> {
    let role = Role::parse(role).with_context(|| format!("Invalid role: {}", role))?;
    let codec = CredentialCodec::with_system_clock(secret);
    let credential = codec
        .issue(subject, role, Duration::from_secs(ttl))
        .context("Failed to issue credential")?;

    println!("{}", credential);
    println!();
    println!("Subject: {}", credential.subject_id());
    println!("Role: {}", credential.role());
    println!("Expires at: {}", credential.expires_at());

    Ok(())
}

fn verify(secret: SigningSecret, token: &str) -> Result<()> {
    let codec = CredentialCodec::with_system_clock(secret);
    let credential = codec.verify(token).context("Credential rejected")?;

    println!("Valid credential");
    println!("Subject: {}", credential.subject_id());
    println!("Role: {}", credential.role());
    println!("Issued at: {}", credential.issued_at());
    println!("Expires at: {}", credential.expires_at());

    Ok(())
}

async fn revoke(db_config: PostgresConfig, secret: SigningSecret, token: &str) -> Result<()> {
    let codec = CredentialCodec::with_system_clock(secret);
    let credential = match codec.verify(token) {
        Ok(credential) => credential,
        Err(CredentialError::Expired) => {
            println!("Credential already expired, nothing to revoke");
            return Ok(());
        }
        Err(e) => return Err(e).context("Credential rejected"),
    };

    let store = Arc::new(PostgresStore::new(db_config).await?);
    let ledger = RevocationLedger::with_system_clock(store);
    ledger.revoke(credential.as_str(), credential.expires_at()).await?;

    println!("Revoked credential for {}", credential.subject_id());
    println!("Marker expires at: {}", credential.expires_at());

    Ok(())
}

async fn purge(db_config: PostgresConfig) -> Result<()> {
    let store = Arc::new(PostgresStore::new(db_config).await?);
    let ledger = RevocationLedger::with_system_clock(store);
    let removed = ledger.purge_expired().await?;

    println!("Purged {} expired revocation markers", removed);
    Ok(())
}

async fn init(db_config: PostgresConfig) -> Result<()> {
    let _store = PostgresStore::new(db_config).await?;
    println!("Database schema initialized successfully");
    Ok(())
}

async fn status(db_config: PostgresConfig) -> Result<()> {
    let store = Arc::new(PostgresStore::new(db_config).await?);
    let ledger = RevocationLedger::with_system_clock(store);
    let live = ledger.len().await?;

    println!("wardbus Status");
    println!("==============");
    println!("Database: Connected");
    println!("Revocation markers: {}", live);

    Ok(())
}
