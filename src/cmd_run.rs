//! `doccron run`: a foreground worker.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use doccron_config::{Config, StoreBackend};
use doccron_scheduler::{Job, JobHandler, Scheduler, SchedulerError};
use doccron_store::{DocumentStore, MemoryStore, SqliteStore};

use crate::store_path;

/// Logs every job it receives.
///
/// Stands in for application code: embedders implement [`JobHandler`]
/// themselves and drive a [`Scheduler`] directly.
struct LogHandler;

#[async_trait]
impl JobHandler for LogHandler {
    async fn on_document(&self, job: &Job) -> Result<(), SchedulerError> {
        info!(
            job_id = %job.id(),
            recurring = job.is_recurring(),
            "Running job: {}",
            job.body()
        );
        Ok(())
    }

    async fn on_start(&self) -> Result<(), SchedulerError> {
        info!("Worker ready");
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), SchedulerError> {
        info!("Worker finished");
        Ok(())
    }

    async fn on_idle(&self) -> Result<(), SchedulerError> {
        debug!("Queue drained");
        Ok(())
    }

    async fn on_error(&self, error: &SchedulerError, job: Option<&Job>) {
        match job {
            Some(job) => error!(job_id = %job.id(), "Job error: {}", error),
            None => error!("Scheduler error: {}", error),
        }
    }
}

/// Run the scheduler until Ctrl-C.
pub(crate) async fn run(config: Config, db: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let store: Arc<dyn DocumentStore> = match config.store.backend {
        StoreBackend::Sqlite => {
            let path = store_path(&config, db)?;
            info!("Using SQLite store at {}", path.display());
            Arc::new(SqliteStore::open(&path).await?)
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; jobs cannot be added from outside this process");
            Arc::new(MemoryStore::new())
        }
    };

    let scheduler = Scheduler::new(store, Arc::new(LogHandler), config.scheduler)?;
    scheduler.start().await;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    scheduler.stop().await;

    let metrics = scheduler.metrics();
    info!(
        "Processed {} jobs ({} rescheduled, {} handler errors, {} store errors)",
        metrics.processed(),
        metrics.rescheduled,
        metrics.handler_errors,
        metrics.store_errors
    );
    Ok(())
}
