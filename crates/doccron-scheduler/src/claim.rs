//! Claim protocol.
//!
//! A job is claimable when its wake-at field exists and is either `null` or
//! not later than now. Claiming sets wake-at to `now + lock_duration` in the
//! same atomic step, which hides the job from every other claimer until the
//! lock lapses. A worker that dies mid-job therefore loses its claim after
//! `lock_duration` and the job runs again.

use chrono::{DateTime, Utc};
use doccron_store::{ceil_to_millis, timestamp_value, DocumentStore, Filter, Query, Update};
use tracing::debug;

use crate::config::{FieldPaths, MAX_LOCK_DURATION_MS};
use crate::error::SchedulerError;
use crate::job::Job;

/// Claims jobs and writes back their fate.
#[derive(Debug, Clone)]
pub struct Claimer {
    paths: FieldPaths,
    condition: Filter,
    lock_duration: chrono::Duration,
}

impl Claimer {
    pub fn new(
        paths: FieldPaths,
        condition: Filter,
        lock_duration: std::time::Duration,
    ) -> Result<Self, SchedulerError> {
        if lock_duration.as_millis() > u128::from(MAX_LOCK_DURATION_MS) {
            return Err(SchedulerError::Config(format!(
                "lock duration {:?} is longer than {} ms",
                lock_duration, MAX_LOCK_DURATION_MS
            )));
        }
        let lock_duration = chrono::Duration::from_std(lock_duration)
            .map_err(|e| SchedulerError::Config(format!("lock duration out of range: {}", e)))?;
        condition
            .validate()
            .map_err(|e| SchedulerError::Config(e.to_string()))?;
        Ok(Self {
            paths,
            condition,
            lock_duration,
        })
    }

    pub fn paths(&self) -> &FieldPaths {
        &self.paths
    }

    /// The query selecting jobs claimable at `now`.
    pub fn claimable_query(&self, now: DateTime<Utc>) -> Result<Query, SchedulerError> {
        let query = Query::new()
            .exists(self.paths.wake_at.clone())
            .not_after(self.paths.wake_at.clone(), now)
            .and_filter(&self.condition)?;
        Ok(query)
    }

    /// Atomically claim one job, or `None` when nothing is claimable.
    pub async fn claim(
        &self,
        store: &dyn DocumentStore,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, SchedulerError> {
        // Rounded up so the stored lock never ends before `now + lock_duration`.
        let locked_until = now
            .checked_add_signed(self.lock_duration)
            .and_then(ceil_to_millis)
            .ok_or_else(|| {
                SchedulerError::Config(format!("lock taken at {} ends out of range", now))
            })?;
        let query = self.claimable_query(now)?;
        let update = Update::new().set(self.paths.wake_at.clone(), timestamp_value(locked_until));

        let claimed = store.find_one_and_update(&query, &update).await?;
        Ok(claimed.map(|document| {
            debug!("Claimed job {} until {}", document.id, locked_until);
            Job::from_claim(document, &self.paths, now, locked_until)
        }))
    }

    /// Make the job claimable again at `at`.
    pub async fn reschedule(
        &self,
        store: &dyn DocumentStore,
        job: &Job,
        at: DateTime<Utc>,
    ) -> Result<bool, SchedulerError> {
        let update = Update::new().set(self.paths.wake_at.clone(), timestamp_value(at));
        Ok(store.update_one(job.id(), &update).await?)
    }

    /// Remove the wake-at field so the job is never claimed again.
    pub async fn retire(&self, store: &dyn DocumentStore, job: &Job) -> Result<bool, SchedulerError> {
        let update = Update::new().unset(self.paths.wake_at.clone());
        Ok(store.update_one(job.id(), &update).await?)
    }

    /// Delete the job document.
    pub async fn remove(&self, store: &dyn DocumentStore, job: &Job) -> Result<bool, SchedulerError> {
        Ok(store.delete_one(job.id()).await?)
    }
}

#[cfg(test)]
#[path = "claim_tests.rs"]
mod tests;
