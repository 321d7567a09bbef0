//! Leases: the result of one lease attempt, and the identity of a lease.

use chrono::{DateTime, Utc};

use super::ids::{TaskId, WorkerId};
use super::state::TaskStatus;
use super::task::TaskDocument;

/// One particular lease on a task: who took it and when.
///
/// A dispatch carries its claim as the correlation token. A worker that
/// reclaims its own expired lease gets a new claim, so results from the
/// abandoned attempt no longer match the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseClaim {
    pub task_id: TaskId,
    pub holder: WorkerId,
    pub acquired_at: DateTime<Utc>,
}

impl LeaseClaim {
    /// The claim recorded on `task`, if it is leased.
    pub fn of(task: &TaskDocument) -> Option<Self> {
        if task.status != TaskStatus::Sending {
            return None;
        }
        Some(Self {
            task_id: task.id,
            holder: task.lease_holder?,
            acquired_at: task.lease_acquired_at?,
        })
    }

    /// Is `task` still under exactly this lease?
    pub fn is_current(&self, task: &TaskDocument) -> bool {
        LeaseClaim::of(task).as_ref() == Some(self)
    }
}

/// What the lease manager did with a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseOutcome {
    /// This worker now holds the lease; the document is the committed state.
    Leased(Box<TaskDocument>),
    /// Another (or this) worker holds a lease that has not expired.
    SkippedAlreadyLeased,
    /// The task was exhausted and has been removed.
    Deleted,
    /// The task was exhausted and has been marked `permanently_failed`.
    Quarantined,
    /// Terminal status; nothing to do.
    SkippedIneligible,
    /// The document no longer exists.
    NotFound,
}

impl LeaseOutcome {
    pub fn leased(self) -> Option<TaskDocument> {
        match self {
            LeaseOutcome::Leased(task) => Some(*task),
            _ => None,
        }
    }

    pub fn is_leased(&self) -> bool {
        matches!(self, LeaseOutcome::Leased(_))
    }

    /// Short label for logs and counters.
    pub fn label(&self) -> &'static str {
        match self {
            LeaseOutcome::Leased(_) => "leased",
            LeaseOutcome::SkippedAlreadyLeased => "already_leased",
            LeaseOutcome::Deleted => "deleted",
            LeaseOutcome::Quarantined => "quarantined",
            LeaseOutcome::SkippedIneligible => "ineligible",
            LeaseOutcome::NotFound => "not_found",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn pending() -> TaskDocument {
        TaskDocument::new_pending(TaskId::from_ulid(Ulid::new()), "+15551234567", "hi", start())
    }

    #[test]
    fn unleased_task_has_no_claim() {
        assert_eq!(LeaseClaim::of(&pending()), None);
    }

    #[test]
    fn reclaim_by_same_worker_is_a_new_claim() {
        let worker = WorkerId::from_ulid(Ulid::new());
        let ttl = Duration::seconds(120);
        let mut task = pending();
        task.acquire_lease(worker, start(), ttl);
        let first = LeaseClaim::of(&task).unwrap();
        assert!(first.is_current(&task));

        task.acquire_lease(worker, start() + Duration::seconds(121), ttl);

        assert!(!first.is_current(&task));
        assert!(LeaseClaim::of(&task).unwrap().is_current(&task));
    }
}
