//! vmschedd — the vmsched scheduler daemon.
//!
//! Assembles the scheduler service:
//! - State store (redb)
//! - Scheduler manager with the configured driver
//! - Maintenance loop (driver periodic tasks, reservation expiry)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! vmschedd serve --config /etc/vmsched/vmsched.toml --listen 0.0.0.0:8774
//! vmschedd check-config --config /etc/vmsched/vmsched.toml
//! ```

mod periodic;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vmsched_core::VmschedConfig;
use vmsched_scheduler::{SchedulerManager, store_collaborators};

const DEFAULT_LOG_FILTER: &str = "info,vmschedd=debug,vmsched=debug";

#[derive(Parser)]
#[command(name = "vmschedd", about = "vmsched scheduler daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler service.
    Serve {
        /// Configuration file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address to listen on, overriding `server.listen`.
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Data directory, overriding `server.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Load a configuration file and print the effective settings.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            config,
            listen,
            data_dir,
        } => {
            let mut config = load_config(config.as_deref())?;
            apply_overrides(&mut config, listen, data_dir);
            serve(config).await
        }
        Command::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
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

fn load_config(path: Option<&Path>) -> anyhow::Result<VmschedConfig> {
    match path {
        Some(path) => Ok(VmschedConfig::from_file(path)?),
        None => Ok(VmschedConfig::default()),
    }
}

fn apply_overrides(config: &mut VmschedConfig, listen: Option<SocketAddr>, data_dir: Option<PathBuf>) {
    if let Some(listen) = listen {
        config.server.listen = listen;
    }
    if let Some(data_dir) = data_dir {
        config.server.data_dir = data_dir;
    }
}

async fn serve(config: VmschedConfig) -> anyhow::Result<()> {
    info!(driver = %config.scheduler.driver, "vmsched daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("vmsched.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = vmsched_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let collaborators = store_collaborators(&store, &config.scheduler);
    let manager = SchedulerManager::new(config.scheduler.clone(), collaborators)?;
    info!(topic = %config.scheduler.compute_topic, "scheduler manager initialized");

    let state = vmsched_api::ApiState::new(store, manager);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let intervals = periodic::PeriodicIntervals {
        periodic_tasks: Duration::from_secs(config.scheduler.periodic_task_interval_secs),
        reservation_expiry: Duration::from_secs(config.scheduler.reservation_expire_interval_secs),
    };
    let periodic_handle = tokio::spawn(periodic::run(
        Arc::clone(&state.manager),
        intervals,
        shutdown_rx,
    ));

    // ── Start API server ───────────────────────────────────────

    let router = vmsched_api::build_router(state);
    let addr = config.server.listen;

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = periodic_handle.await;

    info!("vmsched daemon stopped");
    Ok(())
}
