//! Domain identifiers (strongly-typed IDs).
//!
//! Task and worker ids are ULIDs wrapped in a phantom-typed `Id<T>`, so a
//! `TaskId` can never be passed where a `WorkerId` is expected. ULIDs sort by
//! creation time and can be generated on any device without coordination.
//!
//! Account ids are bound by a human and are free-form strings, so they get a
//! plain newtype instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for each id type.
///
/// Provides the prefix used by `Display` ("task-", "worker-").
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed id.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when an id string is not a valid (optionally prefixed) ULID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id {0:?}")]
pub struct ParseIdError(pub String);

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    /// Accepts both the bare ULID and the `Display` form with prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| ParseIdError(s.to_string()))
    }
}

// ========================================
// Markers
// ========================================

/// Task marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Worker marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Worker {}

impl IdMarker for Worker {
    fn prefix() -> &'static str {
        "worker-"
    }
}

/// Identifier of one `sms_tasks` document. Doubles as the correlation token
/// between a dispatch and its delivery report.
pub type TaskId = Id<Task>;

/// Identifier of one worker instance (one per installed device).
pub type WorkerId = Id<Worker>;

/// The account credited for successful deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Document path of the account in the `users` collection.
    pub fn document_path(&self) -> String {
        format!("users/{}", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who this worker is and whom it credits.
///
/// Passed explicitly into every component that needs it; there is no
/// process-global "current user".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub worker_id: WorkerId,
    pub account_id: AccountId,
}

impl WorkerIdentity {
    pub fn new(worker_id: WorkerId, account_id: AccountId) -> Self {
        Self {
            worker_id,
            account_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let ulid1 = Ulid::new();
        let ulid2 = Ulid::new();

        let task = TaskId::from_ulid(ulid1);
        let worker = WorkerId::from_ulid(ulid2);

        assert_eq!(task.as_ulid(), ulid1);
        assert_eq!(worker.as_ulid(), ulid2);

        assert!(task.to_string().starts_with("task-"));
        assert!(worker.to_string().starts_with("worker-"));
    }

    #[test]
    fn parse_accepts_prefixed_and_bare_forms() {
        let ulid = Ulid::new();
        let prefixed: WorkerId = format!("worker-{ulid}").parse().unwrap();
        let bare: WorkerId = ulid.to_string().parse().unwrap();
        assert_eq!(prefixed, bare);
        assert_eq!(prefixed.as_ulid(), ulid);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "worker-not-a-ulid".parse::<WorkerId>().unwrap_err();
        assert_eq!(err, ParseIdError("worker-not-a-ulid".to_string()));
    }

    #[test]
    fn ulid_ids_are_sortable() {
        let id1 = TaskId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = TaskId::from_ulid(Ulid::new());
        assert!(id1 < id2);
    }

    #[test]
    fn ids_serialize_as_bare_ulid_strings() {
        let ulid = Ulid::new();
        let task = TaskId::from_ulid(ulid);
        let s = serde_json::to_string(&task).unwrap();
        assert_eq!(s, format!("\"{ulid}\""));
        let back: TaskId = serde_json::from_str(&s).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn account_document_path() {
        let account = AccountId::new("u-42");
        assert_eq!(account.document_path(), "users/u-42");
    }
}
