//! Domain model (ids, task document, status, outcomes, retry decisions).

pub mod decision;
pub mod errors;
pub mod ids;
pub mod lease;
pub mod outcome;
pub mod state;
pub mod task;

pub use decision::{ExhaustedPolicy, MAX_RETRIES, RetryDecision, RetryPolicy, RetryTrigger};
pub use errors::{CourierError, ErrorKind};
pub use ids::{AccountId, TaskId, WorkerId, WorkerIdentity};
pub use lease::{LeaseClaim, LeaseOutcome};
pub use outcome::{DeliveryOutcome, ResultCode};
pub use state::TaskStatus;
pub use task::{TASK_COLLECTION, TaskDocument, TaskPatch};
