//! What happens to a job after its handler ran.

use std::fmt;

use chrono::{DateTime, Utc};
use doccron_store::read_timestamp;
use serde_json::Value;

use crate::error::SchedulerError;
use crate::interval::{Interval, NextRun};
use crate::job::Job;

/// How a processed job left the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    /// Claimable again at the given instant.
    Rescheduled(DateTime<Utc>),
    /// One-shot job ran; the wake-at field was removed.
    Completed,
    /// Recurring job has no further occurrence; the wake-at field was removed.
    Expired,
    /// The document was deleted.
    Removed,
}

impl Fate {
    pub fn is_rescheduled(&self) -> bool {
        matches!(self, Fate::Rescheduled(_))
    }
}

impl fmt::Display for Fate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fate::Rescheduled(at) => write!(f, "rescheduled({})", at.to_rfc3339()),
            Fate::Completed => write!(f, "completed"),
            Fate::Expired => write!(f, "expired"),
            Fate::Removed => write!(f, "removed"),
        }
    }
}

/// The decision, before it is written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Reschedule(DateTime<Utc>),
    Complete,
    Expire,
}

/// Decide what to do with `job` at `now`.
///
/// The next occurrence is computed from the claim instant. Occurrences that
/// fell behind `now` while the handler ran are collapsed into one run at
/// `now`. An error means the interval or repeat-until value is unusable; the
/// caller should report it and expire the job.
pub fn next_step(job: &Job, now: DateTime<Utc>) -> Result<NextStep, SchedulerError> {
    let Some(raw) = job.interval() else {
        return Ok(NextStep::Complete);
    };

    let expression = raw
        .as_str()
        .ok_or_else(|| invalid(job, "interval", format!("expected a string, found {}", raw)))?;
    let interval = Interval::parse(expression)
        .map_err(|e| invalid(job, "interval", e.to_string()))?;
    let ceiling = job
        .repeat_until()
        .map(|value| parse_ceiling(job, value))
        .transpose()?;

    match interval.next_after(job.claimed_at(), ceiling) {
        NextRun::At(at) => Ok(NextStep::Reschedule(at.max(now))),
        NextRun::Exhausted => Ok(NextStep::Expire),
    }
}

fn parse_ceiling(job: &Job, value: &Value) -> Result<DateTime<Utc>, SchedulerError> {
    read_timestamp(value)
        .ok_or_else(|| invalid(job, "repeatUntil", format!("{} is not a timestamp", value)))
}

fn invalid(job: &Job, field: &str, reason: String) -> SchedulerError {
    SchedulerError::InvalidJobField {
        job_id: job.id().to_string(),
        field: field.to_string(),
        reason,
    }
}

#[cfg(test)]
#[path = "fate_tests.rs"]
mod tests;
