//! The task document: one outbound message in the shared `sms_tasks` queue.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{TaskId, WorkerId};
use super::state::TaskStatus;

/// Name of the remote collection holding task documents.
pub const TASK_COLLECTION: &str = "sms_tasks";

/// A task document as stored in the queue.
///
/// Field names on the wire follow the collection's existing layout
/// (`phone`, `message`, `leasedBy`, ...), which other clients already write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDocument {
    pub id: TaskId,

    #[serde(rename = "phone")]
    pub destination: String,

    #[serde(rename = "message")]
    pub payload: String,

    pub status: TaskStatus,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default, rename = "leasedBy")]
    pub lease_holder: Option<WorkerId>,

    #[serde(default, rename = "leasedAt")]
    pub lease_acquired_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_error: Option<String>,

    #[serde(default)]
    pub last_error_code: Option<i32>,

    #[serde(default)]
    pub last_error_at: Option<DateTime<Utc>>,

    /// Transport channel (SIM slot) the producer asked for, if any.
    #[serde(default, rename = "preferredSimSlot")]
    pub preferred_slot: Option<usize>,

    pub created_at: DateTime<Utc>,
}

impl TaskDocument {
    /// A freshly created pending document.
    pub fn new_pending(
        id: TaskId,
        destination: impl Into<String>,
        payload: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            destination: destination.into(),
            payload: payload.into(),
            status: TaskStatus::Pending,
            retry_count: 0,
            lease_holder: None,
            lease_acquired_at: None,
            lease_expires_at: None,
            last_error: None,
            last_error_code: None,
            last_error_at: None,
            preferred_slot: None,
            created_at,
        }
    }

    /// Is the lease recorded on this document past its expiry at `now`?
    ///
    /// A `sending` document without an expiry is treated as expired: it
    /// breaks the lease invariant and can only be repaired by reclaiming it.
    pub fn lease_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.lease_expires_at {
            Some(expires_at) => expires_at < now,
            None => true,
        }
    }

    /// Does `worker` hold the lease on this document?
    pub fn is_leased_by(&self, worker: WorkerId) -> bool {
        self.status == TaskStatus::Sending && self.lease_holder == Some(worker)
    }

    /// Take the lease for `worker` starting at `now`.
    pub fn acquire_lease(&mut self, worker: WorkerId, now: DateTime<Utc>, ttl: Duration) {
        self.status = TaskStatus::Sending;
        self.lease_holder = Some(worker);
        self.lease_acquired_at = Some(now);
        self.lease_expires_at = Some(now + ttl);
    }

    pub fn release_lease(&mut self) {
        self.lease_holder = None;
        self.lease_acquired_at = None;
        self.lease_expires_at = None;
    }

    /// Record a failed attempt and leave the document unleased in `status`.
    pub fn record_failure(
        &mut self,
        status: TaskStatus,
        retry_count: u32,
        reason: impl Into<String>,
        code: Option<i32>,
        at: DateTime<Utc>,
    ) {
        self.status = status;
        self.retry_count = retry_count;
        self.last_error = Some(reason.into());
        self.last_error_code = code;
        self.last_error_at = Some(at);
        self.release_lease();
    }

    /// `status == sending` exactly when holder and expiry are both set.
    pub fn lease_invariant_holds(&self) -> bool {
        let leased = self.lease_holder.is_some() && self.lease_expires_at.is_some();
        (self.status == TaskStatus::Sending) == leased
    }

    /// Serialize into the stored document layout.
    pub fn to_document(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Parse a stored document.
    pub fn from_document(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

/// Partial update of a task document.
///
/// Only the fields that are `Some` are written; `release_lease` clears the
/// holder and both lease timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub retry_count: Option<u32>,
    pub last_error: Option<String>,
    pub last_error_code: Option<i32>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub release_lease: bool,
}

impl TaskPatch {
    /// The write recorded after a failed delivery attempt.
    pub fn failure(
        status: TaskStatus,
        retry_count: u32,
        reason: impl Into<String>,
        code: Option<i32>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: Some(status),
            retry_count: Some(retry_count),
            last_error: Some(reason.into()),
            last_error_code: code,
            last_error_at: Some(at),
            release_lease: true,
        }
    }

    pub fn apply(&self, doc: &mut TaskDocument) {
        if let Some(status) = self.status {
            doc.status = status;
        }
        if let Some(retry_count) = self.retry_count {
            doc.retry_count = retry_count;
        }
        if let Some(last_error) = &self.last_error {
            doc.last_error = Some(last_error.clone());
        }
        if let Some(code) = self.last_error_code {
            doc.last_error_code = Some(code);
        }
        if let Some(at) = self.last_error_at {
            doc.last_error_at = Some(at);
        }
        if self.release_lease {
            doc.release_lease();
        }
    }
}
