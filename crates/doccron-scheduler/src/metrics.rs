//! Scheduler metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fate::Fate;

/// Scheduler counters.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Loop iterations (claim attempts).
    pub polls: AtomicU64,

    /// Jobs claimed.
    pub claimed: AtomicU64,

    /// Jobs rescheduled for another run.
    pub rescheduled: AtomicU64,

    /// One-shot jobs retired after running.
    pub completed: AtomicU64,

    /// Recurring jobs retired with no further occurrence.
    pub expired: AtomicU64,

    /// Jobs deleted because of auto-remove.
    pub removed: AtomicU64,

    /// Handler callbacks that returned an error.
    pub handler_errors: AtomicU64,

    /// Store operations that failed.
    pub store_errors: AtomicU64,

    /// Transitions from busy to nothing-claimable.
    pub idle_episodes: AtomicU64,

    start_time: parking_lot::RwLock<Option<Instant>>,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of the loop.
    pub fn mark_start(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn record_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claim(&self) {
        self.claimed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a job by how it left the loop.
    pub fn record_fate(&self, fate: &Fate) {
        let counter = match fate {
            Fate::Rescheduled(_) => &self.rescheduled,
            Fate::Completed => &self.completed,
            Fate::Expired => &self.expired,
            Fate::Removed => &self.removed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle_episode(&self) {
        self.idle_episodes.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            uptime_secs: self.uptime_secs(),
            polls: self.polls.load(Ordering::Relaxed),
            claimed: self.claimed.load(Ordering::Relaxed),
            rescheduled: self.rescheduled.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            idle_episodes: self.idle_episodes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub polls: u64,
    pub claimed: u64,
    pub rescheduled: u64,
    pub completed: u64,
    pub expired: u64,
    pub removed: u64,
    pub handler_errors: u64,
    pub store_errors: u64,
    pub idle_episodes: u64,
}

impl MetricsSnapshot {
    /// Jobs that left the loop one way or another.
    pub fn processed(&self) -> u64 {
        self.rescheduled + self.completed + self.expired + self.removed
    }

    /// Claimed jobs per second of uptime.
    pub fn claims_per_second(&self) -> f64 {
        if self.uptime_secs == 0 {
            return 0.0;
        }
        self.claimed as f64 / self.uptime_secs as f64
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
