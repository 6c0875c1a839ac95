mod api;
mod config;
mod discovery;
mod registry;
mod store;
mod systemd;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::reconcile::RunOptions;
use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::discovery::DiscoveryRunner;
use crate::registry::{Registry, RegistryHandle};
use crate::store::db::ServiceDb;

#[derive(Debug, Parser)]
#[command(name = "navigatord")]
#[command(about = "Home server service navigator")]
#[command(version)]
struct Cli {
    /// Config file; defaults to /etc/home-server-navigator/navigatord.toml when present
    #[arg(long, short, env = "NAVIGATORD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage the systemd unit for this daemon
    #[command(subcommand)]
    Systemd(systemd::SystemdCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("navigatord=info"))
        )
        .init();

    let cli = Cli::parse();
    if let Some(Command::Systemd(command)) = cli.command {
        return systemd::handle(command).await;
    }

    tracing::info!("Starting navigatord {}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            tracing::info!("Loaded config from {}", path.display());
            config
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            let config = Config::load(DEFAULT_CONFIG_PATH)
                .with_context(|| format!("Failed to load config from {}", DEFAULT_CONFIG_PATH))?;
            tracing::info!("Loaded config from {}", DEFAULT_CONFIG_PATH);
            config
        }
        None => {
            tracing::info!("No config file at {}, using defaults", DEFAULT_CONFIG_PATH);
            Config::default()
        }
    };

    let db = ServiceDb::open(&config.store.db_path)?;
    tracing::info!("Opened database at {:?}", config.store.db_path);

    let initial_services = db.get_all_services()?;
    let initial_digest = store::digest::compute_digest(&initial_services);
    tracing::info!(
        "Loaded {} services, registry digest {}",
        initial_services.len(),
        initial_digest
    );

    let (digest_tx, digest_rx) = watch::channel(initial_digest);

    let registry = RegistryHandle::spawn(Registry::new(
        db,
        config.discovery.identity.strategy(),
        RunOptions {
            mark_unseen_unknown: config.discovery.mark_unseen_unknown,
        },
        config.navigator.default_host.clone(),
        digest_tx,
    ));

    let cancel = CancellationToken::new();

    let runner = Arc::new(DiscoveryRunner::new(
        registry.clone(),
        config.discovery.scanner.clone(),
        config.discovery.scan_timeout(),
    ));
    let discovery_cancel = cancel.clone();
    let discovery_runner = runner.clone();
    let discovery_config = config.discovery.clone();
    let discovery_handle = tokio::spawn(async move {
        if let Err(e) = discovery::run(discovery_runner, discovery_config, discovery_cancel).await {
            tracing::error!("Discovery loop error: {}", e);
        }
    });

    let app = api::routes::router(api::routes::AppState {
        registry: registry.clone(),
        digest_rx,
        discovery: runner,
    });

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    let _ = tokio::join!(discovery_handle, server_handle);

    if let Err(e) = registry.shutdown().await {
        tracing::error!("Failed to shut down registry: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
