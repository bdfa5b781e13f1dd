//! pushd: the pushgrid daemon.
//!
//! Single binary that assembles the update server:
//! - State store (redb) holding deployments and release histories
//! - Filesystem blob store for packages, manifests and diffs
//! - Counter store for install metrics and the update-check cache
//! - Background diff worker
//! - REST API (client protocol + release management)
//!
//! # Usage
//!
//! ```text
//! pushd serve --config /etc/pushgrid/pushd.toml --port 3000
//! pushd default-config > pushd.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use pushgrid_core::PushConfig;
use pushgrid_diff::PackageDiffer;
use pushgrid_ledger::{DiffWorker, Ledger};
use pushgrid_metrics::{MemoryCounterStore, MetricsManager};
use pushgrid_state::{BlobStore, FsBlobStore, StateStore};
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,pushd=debug,pushgrid=debug";

#[derive(Parser)]
#[command(name = "pushd", about = "pushgrid over-the-air update daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the update server.
    Serve {
        /// Path to pushd.toml. Built-in defaults apply when absent.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the default configuration as TOML.
    DefaultConfig,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
        } => {
            let mut config = match config {
                Some(path) => {
                    info!(path = ?path, "loading configuration");
                    PushConfig::from_file(&path)?
                }
                None => PushConfig::default(),
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.storage.data_dir = data_dir;
            }
            run_serve(config).await
        }
        Command::DefaultConfig => {
            print!("{}", PushConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

async fn run_serve(config: PushConfig) -> anyhow::Result<()> {
    info!("pushgrid daemon starting");

    std::fs::create_dir_all(&config.storage.data_dir)?;

    // ── Initialize subsystems ──────────────────────────────────

    let db_path = config.database_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let fs_blobs = FsBlobStore::new(config.blob_dir(), &config.server.public_url)?;
    let blobs: Arc<dyn BlobStore> = Arc::new(fs_blobs.clone());
    info!(path = ?config.blob_dir(), "blob store opened");

    let metrics = if config.metrics.enabled {
        MetricsManager::new(
            Arc::new(MemoryCounterStore::new()),
            Duration::from_secs(config.metrics.cache_ttl_secs),
        )
    } else {
        MetricsManager::disabled()
    };
    info!(enabled = metrics.is_enabled(), "metrics initialized");

    let mut ledger = Ledger::new(store, blobs.clone(), metrics);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let diff_handle = if config.diffing.enabled {
        let work_dir = config.diffing.work_dir();
        std::fs::create_dir_all(&work_dir)?;
        let differ = PackageDiffer::new(blobs, config.diffing.max_packages(), work_dir);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let worker = DiffWorker::new(ledger.clone(), differ);
        ledger = ledger.with_diff_queue(jobs_tx);
        info!(
            max_packages = config.diffing.max_packages(),
            "diff worker initialized"
        );
        Some(tokio::spawn(worker.run(jobs_rx, shutdown_rx)))
    } else {
        info!("diffing disabled");
        None
    };

    // ── Start API server ───────────────────────────────────────

    let state = pushgrid_api::ApiState::new(ledger).with_downloads(fs_blobs);
    let router = pushgrid_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for CTRL+C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Let in-flight diff jobs finish.
    if let Some(handle) = diff_handle {
        let _ = handle.await;
    }

    info!("pushgrid daemon stopped");
    Ok(())
}
