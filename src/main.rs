/*!
 * Meridian CLI - bidirectional file-synchronization and hygiene engine
 *
 * Exit codes (spec §6): 0 success, 1 failure to connect, 2 invalid
 * configuration.
 */

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, warn};

use meridian::config::{Config, ProviderMode};
use meridian::credentials::{CredentialStore, FileCredentialStore};
use meridian::engine::facade::Engine;
use meridian::error::{ErrorCategory, MeridianError};
use meridian::notify::{EmailChannel, LoggingMailer, NotificationManager, WebhookChannel};
use meridian::state::StateStore;
use meridian::{commands, logging, schedule};

/// Bidirectional file-synchronization and hygiene engine.
#[derive(Parser, Debug)]
#[command(name = "meridian", author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file (defaults to ./meridian.toml,
    /// falling back to ~/.meridian/meridian.toml, then built-in defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the state database (defaults to ./meridian.db).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory holding per-provider credential files (defaults to
    /// ~/.meridian/credentials).
    #[arg(long, global = true)]
    credentials_dir: Option<PathBuf>,

    /// Write structured JSON logs to this file instead of stdout.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the configured provider and report hygiene findings.
    Scan {
        /// Folder to scan, e.g. "/".
        folder: String,
        /// Write the empty-folder report to this path as JSON.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Run one bidirectional reconciliation pass (local vs. the configured
    /// remote provider).
    Sync {
        /// Folder to reconcile, e.g. "/".
        folder: String,
    },

    /// Compare two arbitrary trees and report the differences.
    Compare {
        left: String,
        right: String,
        #[arg(long, value_enum, default_value = "local")]
        left_mode: ProviderMode,
        #[arg(long, value_enum, default_value = "local")]
        right_mode: ProviderMode,
    },

    /// Run the Operational API and the periodic scan scheduler.
    Serve {
        /// Overrides the configured port.
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.log_file.as_deref(), cli.verbose) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::from(2);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "meridian exited with an error");
            eprintln!("error: {e}");
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(error: &MeridianError) -> ExitCode {
    match error.category() {
        ErrorCategory::Fatal if matches!(error, MeridianError::Config(_) | MeridianError::InvalidPath(_)) => ExitCode::from(2),
        ErrorCategory::Transient | ErrorCategory::RateLimited | ErrorCategory::AuthExpired => ExitCode::from(1),
        _ => ExitCode::from(1),
    }
}

async fn run(cli: Cli) -> Result<(), MeridianError> {
    let config_path = cli.config.clone();
    let config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::load_with_fallback(),
    };

    let db_path = cli.db.clone().unwrap_or_else(|| PathBuf::from("meridian.db"));
    let state_store = StateStore::open(&db_path)?;

    let credentials_dir = cli.credentials_dir.clone().unwrap_or_else(default_credentials_dir);
    let credentials: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(credentials_dir));

    let notifications = build_notifications(&config);

    let engine = Arc::new(Engine::new(config, config_path, state_store, credentials, notifications));

    match cli.command {
        Commands::Scan { folder, export } => commands::scan::run(&engine, &folder, export.as_deref()).await,
        Commands::Sync { folder } => commands::sync::run(&engine, &folder).await,
        Commands::Compare { left, right, left_mode, right_mode } => {
            commands::compare::run(&engine, &left, &right, left_mode, right_mode).await
        }
        Commands::Serve { port } => {
            let bind_port = match port {
                Some(p) => p,
                None => engine.config_snapshot().await.port,
            };
            let scheduler_engine = engine.clone();
            tokio::spawn(async move { run_scheduler(scheduler_engine).await });
            commands::serve::run(engine, bind_port).await
        }
    }
}

fn unix_time() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn default_credentials_dir() -> PathBuf {
    dirs::home_dir().map(|home| home.join(".meridian").join("credentials")).unwrap_or_else(|| PathBuf::from(".meridian/credentials"))
}

fn build_notifications(config: &Config) -> NotificationManager {
    let mut manager = NotificationManager::new();
    if let Some(webhook) = WebhookChannel::from_config(&config.webhook) {
        manager.register(Box::new(webhook));
    }
    if let Some(email) = EmailChannel::from_config(&config.email, LoggingMailer) {
        manager.register(Box::new(email));
    }
    manager
}

/// Periodically checks `Config.schedule` and triggers a root scan when due,
/// a direct port of `scheduler_service.py`'s polling loop. Skips a tick
/// entirely while the engine is already busy.
async fn run_scheduler(engine: Arc<Engine>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        ticker.tick().await;

        let config = engine.config_snapshot().await;
        let now = unix_time();
        if !schedule::is_due(&config.schedule, now) {
            continue;
        }

        let (scanning, deleting, comparing) = engine.busy_flags();
        if schedule::should_skip_busy(scanning, deleting, comparing) {
            continue;
        }

        if let Err(e) = engine.scan("/").await {
            warn!(error = %e, "scheduled scan failed");
            continue;
        }

        let mut updated = config;
        updated.schedule.last_run = now;
        if let Err(e) = engine.update_config(updated).await {
            warn!(error = %e, "failed to persist scheduler last_run");
        }
    }
}
