//! appregd — the application registry daemon.
//!
//! Single binary that assembles the registry:
//! - Store (redb) behind its readiness gate
//! - Registration and discovery services
//! - Health monitor (healthy and unhealthy loops)
//! - REST API
//!
//! On start the daemon registers itself and publishes its own routes, so
//! clients discover the registry through the registry.
//!
//! # Usage
//!
//! ```text
//! appregd serve --config /etc/appreg/appreg.toml --port 8443 --data-dir /var/lib/appreg
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use appreg_core::config::ServerConfig;
use appreg_core::{ProcessIdentity, RegistryConfig};
use appreg_registry::{Registry, UrlEntry};
use appreg_store::{Directory, InitOptions, Store};

#[derive(Parser)]
#[command(name = "appregd", about = "Application registry and discovery daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the registry API and run the health monitor.
    Serve {
        /// TOML config file. Defaults apply to anything it leaves out.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides `server.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for the store (overrides `server.data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,appregd=debug,appreg=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, port, data_dir } => {
            let mut config = match config {
                Some(path) => RegistryConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => RegistryConfig::default(),
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            run_serve(config).await
        }
    }
}

async fn run_serve(config: RegistryConfig) -> anyhow::Result<()> {
    info!("appreg daemon starting");

    std::fs::create_dir_all(&config.server.data_dir)
        .with_context(|| format!("creating {}", config.server.data_dir.display()))?;
    let db_path = config.server.data_dir.join("appreg.redb");

    // ── Store and services ─────────────────────────────────────

    let store = Store::open(&db_path)?;
    info!(path = ?db_path, "store opened");

    let directory = Directory::new(store);
    let registry = Registry::new(directory, &config);

    // ── Self-registration ──────────────────────────────────────

    let identity = ProcessIdentity::current(&config.server, env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .context("describing this process")?;
    let urls = advertised_urls(&config.server, &identity);
    let init = InitOptions {
        upgrade: config.database.upgrade_on_start,
        purge: config.database.purge_on_start,
    };
    let me = registry
        .registration
        .register_self(&identity, init, appreg_api::self_discovery_entries(&urls))
        .await?;
    info!(
        instance_id = me.instance_id,
        version = %identity.version,
        machine = %identity.machine_name,
        "registered self"
    );

    // ── Health monitor ─────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = appreg_health::HealthMonitor::new(registry.discovery.clone(), config.health.clone())?;
    let monitor_handles = monitor.spawn(shutdown_rx);

    // ── API server ─────────────────────────────────────────────

    let router = appreg_api::build_router(registry.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    // ── Shutdown ───────────────────────────────────────────────

    let _ = shutdown_tx.send(true);
    if let Err(e) = registry.registration.set_active_flag(me.instance_id, false).await {
        warn!(error = %e, "failed to mark self inactive");
    }
    monitor_handles.join().await;

    info!("appreg daemon stopped");
    Ok(())
}

/// URLs this daemon is reachable on: the configured list, or
/// `http://<machine>:<port>` since the listener speaks plain HTTP.
/// Deployments that terminate TLS in front of it list their URLs in
/// `server.advertise`.
fn advertised_urls(server: &ServerConfig, identity: &ProcessIdentity) -> Vec<UrlEntry> {
    if server.advertise.is_empty() {
        return vec![UrlEntry {
            url: format!("http://{}", identity.machine_name),
            port: Some(server.port),
        }];
    }
    server
        .advertise
        .iter()
        .map(|a| UrlEntry { url: a.url.clone(), port: a.port })
        .collect()
}
