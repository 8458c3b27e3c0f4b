//! Scheduler lifecycle.
//!
//! One [`Scheduler`] drives one loop task. Several schedulers (in one
//! process or many) may share a collection; the claim protocol keeps them
//! from running the same job twice.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use doccron_store::{DocumentId, DocumentStore};
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::claim::Claimer;
use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::fate::Fate;
use crate::handler::{guarded, JobHandler};
use crate::job::Job;
use crate::metrics::{MetricsSnapshot, SchedulerMetrics};
use crate::state::SchedulerState;

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;

/// Result of one loop iteration.
#[derive(Debug)]
pub enum PollOutcome {
    /// Nothing was claimable.
    Idle,
    /// A job was claimed, handled and its fate recorded.
    Processed { job_id: DocumentId, fate: Fate },
    /// The store failed; the error was already passed to the handler.
    Failed(SchedulerError),
}

/// Shared between the [`Scheduler`] handle and its loop task.
pub(crate) struct SchedulerInner {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) handler: Arc<dyn JobHandler>,
    pub(crate) config: SchedulerConfig,
    pub(crate) claimer: Claimer,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: SchedulerMetrics,
    /// Stopped, Starting, Idle (running) or Stopping.
    pub(crate) lifecycle: AtomicU8,
    pub(crate) processing: AtomicBool,
    pub(crate) idle: AtomicBool,
}

impl SchedulerInner {
    pub(crate) async fn report(&self, err: &SchedulerError, job: Option<&Job>) {
        let reported = AssertUnwindSafe(self.handler.on_error(err, job))
            .catch_unwind()
            .await;
        if reported.is_err() {
            error!("Error callback panicked while reporting: {}", err);
        }
    }
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Polls a document collection for due jobs and runs them.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    running: Mutex<Option<LoopHandle>>,
}

impl Scheduler {
    /// Create a scheduler using the system clock.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        handler: Arc<dyn JobHandler>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        Self::with_clock(store, handler, config, Arc::new(SystemClock))
    }

    /// Create a scheduler reading time from `clock`.
    pub fn with_clock(
        store: Arc<dyn DocumentStore>,
        handler: Arc<dyn JobHandler>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SchedulerError> {
        let paths = config.validate()?;
        let claimer = Claimer::new(paths, config.condition.clone(), config.lock_duration())?;

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                store,
                handler,
                config,
                claimer,
                clock,
                metrics: SchedulerMetrics::new(),
                lifecycle: AtomicU8::new(SchedulerState::Stopped as u8),
                processing: AtomicBool::new(false),
                idle: AtomicBool::new(false),
            }),
            running: Mutex::new(None),
        })
    }

    /// Start the loop. Does nothing if it is already running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Scheduler already running");
            return;
        }

        let inner = &self.inner;
        inner.lifecycle.store(SchedulerState::Starting as u8, Ordering::SeqCst);
        inner.idle.store(false, Ordering::SeqCst);

        if let Err(e) = guarded(inner.handler.on_start()).await {
            error!("Start callback failed: {}", e);
            inner.report(&e, None).await;
        }

        inner.metrics.mark_start();
        inner.lifecycle.store(SchedulerState::Idle as u8, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(inner.clone().run(cancel.clone()));
        *running = Some(LoopHandle { cancel, task });

        info!(
            "Scheduler started (lock duration {:?}, idle delay {:?})",
            inner.config.lock_duration(),
            inner.config.idle_delay()
        );
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// A job being processed is allowed to finish and have its fate
    /// recorded first. Does nothing if the scheduler is not running.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(handle) = running.take() else {
            return;
        };

        info!("Scheduler stopping");
        let inner = &self.inner;
        inner.lifecycle.store(SchedulerState::Stopping as u8, Ordering::SeqCst);
        handle.cancel.cancel();

        if let Err(e) = handle.task.await {
            error!("Scheduler loop ended abnormally: {}", e);
        }

        inner.idle.store(false, Ordering::SeqCst);
        inner.lifecycle.store(SchedulerState::Stopped as u8, Ordering::SeqCst);

        if let Err(e) = guarded(inner.handler.on_stop()).await {
            error!("Stop callback failed: {}", e);
            inner.report(&e, None).await;
        }
        info!("Scheduler stopped");
    }

    /// Run a single iteration on the caller's task.
    ///
    /// Works whether or not the loop is running; a concurrent loop simply
    /// competes for the same jobs.
    pub async fn poll_once(&self) -> PollOutcome {
        self.inner.poll().await
    }

    pub fn state(&self) -> SchedulerState {
        let lifecycle = SchedulerState::from(self.inner.lifecycle.load(Ordering::SeqCst));
        match lifecycle {
            SchedulerState::Idle if self.inner.processing.load(Ordering::SeqCst) => {
                SchedulerState::Processing
            }
            state => state,
        }
    }

    /// Started and not yet fully stopped.
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// A claimed job is being handled or settled.
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::SeqCst)
    }

    /// Running, and the last claim attempt found nothing.
    pub fn is_idle(&self) -> bool {
        self.is_running() && self.inner.idle.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.running.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}
