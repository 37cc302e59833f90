//! minerguard - fleet monitor for storage-mining nodes
//!
//! Main entry point for the minerguard agent.

mod signal;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use minerguard_config::{Config, ConfigLoader, ConfigValidator};
use minerguard_engine::{DefaultClientFactory, FleetOrchestrator};

use crate::signal::{FleetSignal, SignalHandler};

const DEFAULT_CONFIG_PATH: &str = "/opt/cess/watchdog/config.yaml";

/// Upper bound for waiting on in-flight cycles during a reload.
const MAX_RELOAD_DEADLINE: Duration = Duration::from_secs(60 * 60);

/// Time given to in-flight cycles on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// minerguard CLI.
#[derive(Parser)]
#[command(name = "minerguard")]
#[command(about = "Fleet monitor for storage-mining nodes")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        env = "MINERGUARD_CONFIG",
        default_value = DEFAULT_CONFIG_PATH,
        global = true
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor the configured hosts (default)
    Run,

    /// Validate the configuration and print it with secrets masked
    CheckConfig,
}

fn minerguard_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".minerguard"))
        .unwrap_or_else(|| PathBuf::from(".minerguard"))
}

/// Initialize tracing with console and file output.
///
/// Log files are written to ~/.minerguard/logs/ with daily rotation.
fn init_tracing() -> anyhow::Result<()> {
    let log_dir = minerguard_dir().join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("minerguard")
        .filename_suffix("log")
        .max_log_files(30)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the background writer.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    let config_path = PathBuf::from(ConfigLoader::expand_path(&cli.config.to_string_lossy()));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config_path).await,
        Commands::CheckConfig => check_config(&config_path),
    }
}

/// Load the config and log every validation finding.
fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = ConfigLoader::load(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;

    let result = ConfigValidator::validate(&config);
    for warning in &result.warnings {
        warn!("{}: {}", warning.path, warning.message);
    }
    if let Some(err) = result.error() {
        return Err(err).with_context(|| format!("validating {}", path.display()));
    }
    Ok(config)
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    print!("{}", serde_yml::to_string(&config.redacted())?);
    Ok(())
}

fn reload_deadline(config: &Config) -> Duration {
    config.scrape_interval().min(MAX_RELOAD_DEADLINE)
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    info!("Starting minerguard v{}", env!("CARGO_PKG_VERSION"));
    let config = load_config(config_path)?;
    info!(
        "Loaded {} hosts from {}",
        config.hosts.len(),
        config_path.display()
    );

    let signals = SignalHandler::new();
    let mut rx = signals.subscribe();
    signals.install().context("installing signal handlers")?;

    let fleet = Arc::new(FleetOrchestrator::new(Arc::new(DefaultClientFactory)));
    fleet.start(config).await?;

    loop {
        match rx.recv().await {
            Ok(FleetSignal::Shutdown) | Err(RecvError::Closed) => break,
            Ok(FleetSignal::Reload) => {
                let deadline = match ConfigLoader::load(config_path) {
                    Ok(config) => reload_deadline(&config),
                    Err(_) => MAX_RELOAD_DEADLINE,
                };
                let fleet = fleet.clone();
                let path = config_path.to_path_buf();
                // Failures are logged by the orchestrator.
                tokio::spawn(async move {
                    let _ = fleet.reload(&path, deadline).await;
                });
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Dropped {} signals", skipped);
            }
        }
    }

    info!("Shutting down");
    fleet.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}
