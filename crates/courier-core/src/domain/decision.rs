//! Retry policy: decides what a failure or an exhausted task turns into.
//!
//! This is a pure function of the current retry count and what triggered the
//! decision. Executing the decision (writing the document, deleting it) is
//! left to the lease manager and the outcome handler.

use serde::{Deserialize, Serialize};

/// Default bound on delivery attempts per task.
pub const MAX_RETRIES: u32 = 3;

/// What the policy is being asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTrigger {
    /// A pending/failed task is about to be leased.
    LeaseCheck,
    /// A `sending` task was found with an expired lease; the previous holder
    /// never reported back, so that attempt counts as failed.
    LeaseExpired,
    /// The transport (or the dispatcher's checks) reported a failure.
    DeliveryFailed,
}

/// The policy's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Go ahead and lease with this retry count.
    Proceed { retry_count: u32 },
    /// Leave the task eligible for another attempt.
    Retry { retry_count: u32 },
    /// Quarantine as `permanently_failed`.
    PermanentlyFail { retry_count: u32 },
    /// Remove the document. Only ever produced at lease time.
    DeleteNow,
}

/// What happens to a task that is already exhausted when it is leased.
///
/// Older producers expect such tasks to vanish; `Quarantine` keeps them
/// around as `permanently_failed` for auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    #[default]
    Delete,
    Quarantine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub exhausted_at_lease: ExhaustedPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            exhausted_at_lease: ExhaustedPolicy::Delete,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, exhausted_at_lease: ExhaustedPolicy) -> Self {
        Self {
            max_retries,
            exhausted_at_lease,
        }
    }

    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    pub fn decide(&self, retry_count: u32, trigger: RetryTrigger) -> RetryDecision {
        match trigger {
            RetryTrigger::LeaseCheck => {
                if self.is_exhausted(retry_count) {
                    self.exhausted_at_lease(retry_count)
                } else {
                    RetryDecision::Proceed { retry_count }
                }
            }
            RetryTrigger::LeaseExpired => {
                if self.is_exhausted(retry_count) {
                    return self.exhausted_at_lease(retry_count);
                }
                // the abandoned attempt is charged before re-leasing
                let next = retry_count.saturating_add(1);
                if self.is_exhausted(next) {
                    RetryDecision::PermanentlyFail { retry_count: next }
                } else {
                    RetryDecision::Proceed { retry_count: next }
                }
            }
            RetryTrigger::DeliveryFailed => {
                let next = retry_count.saturating_add(1);
                if self.is_exhausted(next) {
                    RetryDecision::PermanentlyFail { retry_count: next }
                } else {
                    RetryDecision::Retry { retry_count: next }
                }
            }
        }
    }

    fn exhausted_at_lease(&self, retry_count: u32) -> RetryDecision {
        match self.exhausted_at_lease {
            ExhaustedPolicy::Delete => RetryDecision::DeleteNow,
            ExhaustedPolicy::Quarantine => RetryDecision::PermanentlyFail { retry_count },
        }
    }
}
