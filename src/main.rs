//! doccron - cron-style job queue on top of a document collection
//!
//! Main entry point for the doccron CLI and worker.

mod cli;
mod cmd_jobs;
mod cmd_run;

use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use doccron_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig, StoreBackend};
use doccron_store::SqliteStore;

use crate::cli::{Cli, Commands};

/// Get the doccron home directory (~/.doccron).
fn doccron_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".doccron")
}

/// Resolve the database file, creating its parent directory.
pub(crate) fn store_path(config: &Config, db: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let path = db.unwrap_or_else(|| ConfigLoader::expand_path(&config.store.path));
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(path)
}

async fn open_sqlite(config: &Config, db: Option<PathBuf>) -> anyhow::Result<SqliteStore> {
    if db.is_none() && config.store.backend == StoreBackend::Memory {
        bail!("This command needs a database file; pass --db or use the sqlite backend");
    }
    let path = store_path(config, db)?;
    Ok(SqliteStore::open(&path).await?)
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)?,
    };

    // Daily-rotated file output, only when a directory is configured
    let file_layer = match &logging.file_dir {
        Some(dir) => {
            let log_dir = ConfigLoader::expand_path(dir);
            std::fs::create_dir_all(&log_dir)?;

            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("doccron")
                .filename_suffix("log")
                .max_log_files(30)
                .build(&log_dir)?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Keep the writer alive for the whole process
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    // Console goes to stderr so command output on stdout stays clean
    let console_text = (!logging.json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });
    let console_json = logging
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_text)
        .with(console_json)
        .with(file_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load(path)?,
        None => ConfigLoader::load_or_default(&doccron_dir().join("config.toml"))?,
    };

    init_tracing(&config.logging)?;

    let warnings = ConfigValidator::validate(&config).into_result()?;
    let fields = config.scheduler.validate()?;

    match cli.command {
        Commands::Run => {
            for warning in warnings {
                warn!("{}: {}", warning.path, warning.message);
            }
            cmd_run::run(config, cli.db).await
        }
        Commands::Add(args) => {
            let store = open_sqlite(&config, cli.db).await?;
            cmd_jobs::add(&store, &fields, args).await
        }
        Commands::List { all, format } => {
            let store = open_sqlite(&config, cli.db).await?;
            cmd_jobs::list(&store, &fields, all, format).await
        }
        Commands::Remove { id } => {
            let store = open_sqlite(&config, cli.db).await?;
            cmd_jobs::remove(&store, &id).await
        }
        Commands::Next {
            expression,
            count,
            after,
        } => cmd_jobs::next(&expression, count, after.as_deref()),
    }
}
