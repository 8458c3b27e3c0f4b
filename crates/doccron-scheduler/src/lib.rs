//! # doccron Scheduler
//!
//! Turns a document collection into a distributed job queue.
//!
//! A document is a job while its wake-at field (`sleepUntil` by default)
//! exists. It becomes due once that field is `null` or not later than now.
//! Any number of [`Scheduler`]s may poll the same collection: each claim
//! atomically pushes the wake-at field `lock_duration` into the future, so a
//! job is handled by one worker at a time and a crashed worker's job comes
//! back after the lock lapses.
//!
//! After the handler returns, one-shot jobs lose their wake-at field (or are
//! deleted with `autoRemove`), and recurring jobs with an `interval`
//! expression are rescheduled to their next occurrence until `repeatUntil`
//! passes.
//!
//! ## Key Components
//!
//! - [`Interval`]: six-field cron expressions evaluated in UTC
//! - [`Claimer`]: the claim protocol and fate write-back
//! - [`Scheduler`]: lifecycle and polling loop
//! - [`JobHandler`]: user callbacks

pub mod claim;
pub mod clock;
pub mod config;
pub mod error;
pub mod fate;
pub mod handler;
pub mod interval;
pub mod job;
pub mod metrics;
pub mod scheduler;
mod scheduler_loop;
pub mod state;

pub use claim::Claimer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FieldNames, FieldPaths, MAX_LOCK_DURATION_MS, SchedulerConfig};
pub use error::SchedulerError;
pub use fate::{next_step, Fate, NextStep};
pub use handler::{handler_fn, FnHandler, JobHandler};
pub use interval::{next, Interval, IntervalError, NextRun, Upcoming};
pub use job::Job;
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use scheduler::{PollOutcome, Scheduler};
pub use state::SchedulerState;
