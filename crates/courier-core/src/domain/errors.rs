//! Errors and their operational classification.

use thiserror::Error;

use super::ids::TaskId;
use crate::ports::task_store::StoreError;
use crate::ports::transport::TransportError;

/// How an error should be treated by the loops.
///
/// - Transient: try again on the next trigger
/// - Permanent: retrying the same thing is pointless
/// - Infrastructure: the store or transport is unusable right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum CourierError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The lease transaction kept losing to concurrent writers.
    #[error("transaction on {task_id} aborted after {attempts} conflicting attempts")]
    Contention { task_id: TaskId, attempts: u32 },
}

impl CourierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CourierError::Store(StoreError::Unavailable(_)) => ErrorKind::Infrastructure,
            CourierError::Store(StoreError::Conflict { .. }) => ErrorKind::Transient,
            CourierError::Store(StoreError::WatchClosed) => ErrorKind::Infrastructure,
            CourierError::Transport(TransportError::Rejected(_)) => ErrorKind::Permanent,
            CourierError::Transport(TransportError::Unavailable(_)) => ErrorKind::Infrastructure,
            CourierError::Contention { .. } => ErrorKind::Transient,
        }
    }
}
