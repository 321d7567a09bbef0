//! Task status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of an `sms_tasks` document.
///
/// State transitions:
/// - Pending/Failed -> Sending (lease acquired)
/// - Sending -> (deleted) on delivery success
/// - Sending -> Failed when retries remain
/// - Sending -> PermanentlyFailed when retries are exhausted
/// - Sending -> Sending when an expired lease is reclaimed
///
/// `Sent` is never written by the engine (success deletes the document) but
/// documents carrying it are recognised and left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    PermanentlyFailed,
}

impl TaskStatus {
    /// No further transitions except deletion.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Sent | TaskStatus::PermanentlyFailed)
    }

    /// Eligible for a fresh lease.
    pub fn is_leasable(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Sending => "sending",
            TaskStatus::Sent => "sent",
            TaskStatus::Failed => "failed",
            TaskStatus::PermanentlyFailed => "permanently_failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
