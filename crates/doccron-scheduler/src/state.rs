//! Scheduler lifecycle state.

use serde::{Deserialize, Serialize};

/// Where the scheduler is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SchedulerState {
    /// Not started, or fully stopped.
    Stopped = 0,
    /// `start` is running the start notification.
    Starting = 1,
    /// Running with nothing in hand.
    Idle = 2,
    /// A claimed job is being handled.
    Processing = 3,
    /// `stop` was requested; the in-flight job (if any) is finishing.
    Stopping = 4,
}

impl SchedulerState {
    /// Started and not yet fully stopped.
    pub fn is_running(self) -> bool {
        !matches!(self, SchedulerState::Stopped)
    }
}

impl From<u8> for SchedulerState {
    fn from(v: u8) -> Self {
        match v {
            1 => SchedulerState::Starting,
            2 => SchedulerState::Idle,
            3 => SchedulerState::Processing,
            4 => SchedulerState::Stopping,
            _ => SchedulerState::Stopped,
        }
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Stopped => write!(f, "stopped"),
            SchedulerState::Starting => write!(f, "starting"),
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Processing => write!(f, "processing"),
            SchedulerState::Stopping => write!(f, "stopping"),
        }
    }
}
