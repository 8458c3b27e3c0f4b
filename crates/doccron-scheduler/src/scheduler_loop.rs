//! The polling loop.
//!
//! Each iteration claims at most one job, awaits its handler, records its
//! fate and then pauses: `reprocess_delay` after a reschedule,
//! `next_delay` after any other fate and `idle_delay` when nothing was
//! claimable or the store failed. Cancellation is checked between
//! iterations and during the pause, never while a job is in hand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::SchedulerError;
use crate::fate::{next_step, Fate, NextStep};
use crate::handler::guarded;
use crate::job::Job;
use crate::scheduler::{PollOutcome, SchedulerInner};

impl SchedulerInner {
    pub(crate) async fn run(self: Arc<Self>, cancel: CancellationToken) {
        debug!("Scheduler loop entered");

        while !cancel.is_cancelled() {
            let delay = match self.poll().await {
                PollOutcome::Idle | PollOutcome::Failed(_) => self.config.idle_delay(),
                PollOutcome::Processed { fate, .. } if fate.is_rescheduled() => {
                    self.config.reprocess_delay()
                }
                PollOutcome::Processed { .. } => self.config.next_delay(),
            };

            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!("Scheduler loop exited");
    }

    pub(crate) async fn poll(&self) -> PollOutcome {
        self.metrics.record_poll();

        let now = self.clock.now();
        let job = match self.claimer.claim(self.store.as_ref(), now).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                self.enter_idle().await;
                return PollOutcome::Idle;
            }
            Err(e) => {
                self.metrics.record_store_error();
                warn!("Failed to claim job: {}", e);
                self.report(&e, None).await;
                return PollOutcome::Failed(e);
            }
        };

        self.idle.store(false, Ordering::SeqCst);
        let _processing = ProcessingFlag::raise(&self.processing);
        self.metrics.record_claim();

        self.process(job).await
    }

    async fn enter_idle(&self) {
        if self.idle.swap(true, Ordering::SeqCst) {
            return;
        }

        self.metrics.record_idle_episode();
        debug!("No claimable jobs");
        if let Err(e) = guarded(self.handler.on_idle()).await {
            warn!("Idle callback failed: {}", e);
            self.report(&e, None).await;
        }
    }

    async fn process(&self, job: Job) -> PollOutcome {
        debug!("Processing job {}", job.id());

        if let Err(e) = guarded(self.handler.on_document(&job)).await {
            self.metrics.record_handler_error();
            warn!("Handler failed for job {}: {}", job.id(), e);
            self.report(&e, Some(&job)).await;
        }

        let step = match next_step(&job, self.clock.now()) {
            Ok(step) => step,
            Err(e) => {
                warn!("Expiring job {}: {}", job.id(), e);
                self.report(&e, Some(&job)).await;
                NextStep::Expire
            }
        };

        match self.settle(&job, step).await {
            Ok(fate) => {
                self.metrics.record_fate(&fate);
                debug!("Job {} {}", job.id(), fate);
                PollOutcome::Processed {
                    job_id: job.id().clone(),
                    fate,
                }
            }
            Err(e) => {
                self.metrics.record_store_error();
                error!("Failed to record fate of job {}: {}", job.id(), e);
                self.report(&e, Some(&job)).await;
                PollOutcome::Failed(e)
            }
        }
    }

    /// Write the decision back to the store.
    async fn settle(&self, job: &Job, step: NextStep) -> Result<Fate, SchedulerError> {
        let store = self.store.as_ref();

        let (found, fate) = match step {
            NextStep::Reschedule(at) => (
                self.claimer.reschedule(store, job, at).await?,
                Fate::Rescheduled(at),
            ),
            _ if job.auto_remove() => (self.claimer.remove(store, job).await?, Fate::Removed),
            NextStep::Complete => (self.claimer.retire(store, job).await?, Fate::Completed),
            NextStep::Expire => (self.claimer.retire(store, job).await?, Fate::Expired),
        };

        if !found {
            debug!("Job {} disappeared before its fate was recorded", job.id());
        }
        Ok(fate)
    }
}

/// Holds the processing flag up until dropped.
struct ProcessingFlag<'a>(&'a AtomicBool);

impl<'a> ProcessingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ProcessingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
