//! Scheduler configuration.

use std::time::Duration;

use doccron_store::{FieldPath, Filter};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long a claimed job stays invisible to other claimers.
    #[serde(default = "default_lock_duration_ms")]
    pub lock_duration_ms: u64,

    /// Pause after a job that was retired (completed, expired or removed).
    #[serde(default)]
    pub next_delay_ms: u64,

    /// Pause after a job that was rescheduled.
    #[serde(default)]
    pub reprocess_delay_ms: u64,

    /// Pause when nothing is claimable or the store failed.
    #[serde(default)]
    pub idle_delay_ms: u64,

    /// Document field names the scheduler reads and writes.
    #[serde(default)]
    pub fields: FieldNames,

    /// Extra equality filter every claimed job must satisfy.
    #[serde(default)]
    pub condition: Filter,
}

/// Longest accepted lock (100 years). Keeps `now + lock` inside the
/// representable date range.
pub const MAX_LOCK_DURATION_MS: u64 = 100 * 365 * 24 * 60 * 60 * 1000;

fn default_lock_duration_ms() -> u64 {
    600_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_duration_ms: default_lock_duration_ms(),
            next_delay_ms: 0,
            reprocess_delay_ms: 0,
            idle_delay_ms: 0,
            fields: FieldNames::default(),
            condition: Filter::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    pub fn next_delay(&self) -> Duration {
        Duration::from_millis(self.next_delay_ms)
    }

    pub fn reprocess_delay(&self) -> Duration {
        Duration::from_millis(self.reprocess_delay_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_next_delay(mut self, delay: Duration) -> Self {
        self.next_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_reprocess_delay(mut self, delay: Duration) -> Self {
        self.reprocess_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_fields(mut self, fields: FieldNames) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_condition(mut self, condition: Filter) -> Self {
        self.condition = condition;
        self
    }

    /// Check the configuration and resolve field names into paths.
    pub fn validate(&self) -> Result<FieldPaths, SchedulerError> {
        if self.lock_duration_ms == 0 {
            return Err(SchedulerError::Config(
                "lock_duration_ms must be greater than zero".to_string(),
            ));
        }
        if self.lock_duration_ms > MAX_LOCK_DURATION_MS {
            return Err(SchedulerError::Config(format!(
                "lock_duration_ms must not exceed {}",
                MAX_LOCK_DURATION_MS
            )));
        }
        self.condition
            .validate()
            .map_err(|e| SchedulerError::Config(e.to_string()))?;
        self.fields.resolve()
    }
}

/// Names of the fields that drive scheduling, as dotted paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldNames {
    /// Eligibility marker and wake-up time.
    #[serde(default = "default_wake_at")]
    pub wake_at: String,

    /// Interval expression for recurring jobs.
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Last instant a recurring job may run.
    #[serde(default = "default_repeat_until")]
    pub repeat_until: String,

    /// Delete the job instead of retiring it.
    #[serde(default = "default_auto_remove")]
    pub auto_remove: String,
}

fn default_wake_at() -> String {
    "sleepUntil".to_string()
}

fn default_interval() -> String {
    "interval".to_string()
}

fn default_repeat_until() -> String {
    "repeatUntil".to_string()
}

fn default_auto_remove() -> String {
    "autoRemove".to_string()
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            wake_at: default_wake_at(),
            interval: default_interval(),
            repeat_until: default_repeat_until(),
            auto_remove: default_auto_remove(),
        }
    }
}

impl FieldNames {
    /// Parse every name into a [`FieldPath`].
    pub fn resolve(&self) -> Result<FieldPaths, SchedulerError> {
        let parse = |raw: &str| FieldPath::parse(raw).map_err(|e| SchedulerError::Config(e.to_string()));
        let paths = FieldPaths {
            wake_at: parse(&self.wake_at)?,
            interval: parse(&self.interval)?,
            repeat_until: parse(&self.repeat_until)?,
            auto_remove: parse(&self.auto_remove)?,
        };

        let all = [&paths.wake_at, &paths.interval, &paths.repeat_until, &paths.auto_remove];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                if a == b {
                    return Err(SchedulerError::Config(format!(
                        "field '{}' is configured for more than one role",
                        a
                    )));
                }
            }
        }
        Ok(paths)
    }
}

/// Resolved field paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPaths {
    pub wake_at: FieldPath,
    pub interval: FieldPath,
    pub repeat_until: FieldPath,
    pub auto_remove: FieldPath,
}
