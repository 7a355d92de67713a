use anyhow::{Context, Result};
use clap::Parser;
use regsync::{Reconciler, SyncOutcome};
use regsync_core::config::stale_after_from_secs;
use regsync_core::{FileConfig, SyncConfig};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "regsync")]
#[command(
    about = "Reconcile the registration bot's JSON snapshots into SQLite",
    long_about = None
)]
struct Cli {
    /// TOML file with path and lock settings
    #[arg(long, env = "REGSYNC_CONFIG")]
    config: Option<PathBuf>,
    /// Users snapshot (chat_id -> profile)
    #[arg(long, env = "REGSYNC_USERS")]
    users: Option<PathBuf>,
    /// States snapshot (chat_id -> conversation stage)
    #[arg(long, env = "REGSYNC_STATES")]
    states: Option<PathBuf>,
    /// SQLite database file
    #[arg(long, env = "REGSYNC_DB")]
    db: Option<PathBuf>,
    /// Marker file that keeps passes from overlapping
    #[arg(long, env = "REGSYNC_LOCK")]
    lock: Option<PathBuf>,
    /// Reclaim a lock marker older than this; 0 never expires it
    #[arg(long, env = "REGSYNC_LOCK_STALE_AFTER_SECS")]
    lock_stale_after_secs: Option<u64>,
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %format!("{err:#}"), "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match Reconciler::new(config).run() {
        Ok(SyncOutcome::AlreadyRunning | SyncOutcome::NothingToSync) => ExitCode::SUCCESS,
        Ok(SyncOutcome::Completed(report)) => {
            if report.failed() > 0 {
                info!(failed = report.failed(), "some records were skipped");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "reconciliation pass failed");
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: &Cli) -> Result<SyncConfig> {
    let mut config = SyncConfig::default();
    if let Some(path) = &cli.config {
        let file = FileConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?;
        config.apply_file(file);
    }
    if let Some(path) = &cli.users {
        config.users_path = path.clone();
    }
    if let Some(path) = &cli.states {
        config.states_path = path.clone();
    }
    if let Some(path) = &cli.db {
        config.db_path = path.clone();
    }
    if let Some(path) = &cli.lock {
        config.lock_path = path.clone();
    }
    if let Some(secs) = cli.lock_stale_after_secs {
        config.lock_stale_after = stale_after_from_secs(secs);
    }
    Ok(config)
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("REGSYNC_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
