//! OutcomeHandler - 送信結果を受けてタスクの最終状態を書き込む
//!
//! - 成功: タスクを削除し、削除できたときだけアカウント残高を加算
//! - 失敗: Retry Policy に従って `failed` / `permanently_failed` にし、リースを解放
//!
//! 成功時の削除と加算は再試行しない。失敗したらログに残し、取りこぼしは
//! リース期限切れによる回収に任せる（at-least-once）。
//!
//! 失敗の書き込みは `transact` の中で読み直してから判断する。対象は dispatch 時の
//! `LeaseClaim` と同じリース世代のときだけで、回収済み（他のワーカーでも、
//! 自分の新しいリースでも）なら触らない。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::app::status::WorkerStats;
use crate::domain::{
    CourierError, DeliveryOutcome, LeaseClaim, RetryDecision, RetryPolicy, RetryTrigger,
    TaskDocument, TaskStatus, WorkerIdentity,
};
use crate::ports::{Clock, QueueStore, WriteSet, transact};

/// 残高フィールド名
pub const BALANCE_FIELD: &str = "balance";

/// `on_result` が最終的に何をしたか
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Finalized {
    /// タスクを削除した。`credited` は残高加算に成功したか
    Delivered { credited: bool },
    /// 既に削除済み（重複・遅延した成功報告）
    AlreadyGone,
    /// `failed` に戻した
    Retrying { retry_count: u32 },
    /// `permanently_failed` にした
    Quarantined { retry_count: u32 },
    /// 報告したリースではなくなっていた（期限切れ後に回収された）
    Stale,
    /// 失敗報告の対象が存在しない
    Missing,
}

/// 失敗報告を受けたタスクに何を書き込むかを決める
///
/// `claim` のリース世代が今も続いているときだけ書き込む。
pub fn decide_failure(
    task: &TaskDocument,
    claim: &LeaseClaim,
    reason: &str,
    code: Option<i32>,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
) -> (WriteSet, Finalized) {
    if !claim.is_current(task) {
        return (WriteSet::Keep, Finalized::Stale);
    }

    let (status, retry_count, finalized) =
        match policy.decide(task.retry_count, RetryTrigger::DeliveryFailed) {
            RetryDecision::PermanentlyFail { retry_count } => (
                TaskStatus::PermanentlyFailed,
                retry_count,
                Finalized::Quarantined { retry_count },
            ),
            RetryDecision::Retry { retry_count } | RetryDecision::Proceed { retry_count } => (
                TaskStatus::Failed,
                retry_count,
                Finalized::Retrying { retry_count },
            ),
            // delivery failures never delete
            RetryDecision::DeleteNow => {
                let retry_count = task.retry_count.saturating_add(1);
                (
                    TaskStatus::PermanentlyFailed,
                    retry_count,
                    Finalized::Quarantined { retry_count },
                )
            }
        };

    let mut failed = task.clone();
    failed.record_failure(status, retry_count, reason, code, now);
    (WriteSet::Put(failed), finalized)
}

pub struct OutcomeHandler {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    credit_amount: f64,
    max_transaction_attempts: u32,
    stats: Arc<WorkerStats>,
}

impl OutcomeHandler {
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        credit_amount: f64,
        max_transaction_attempts: u32,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            credit_amount,
            max_transaction_attempts,
            stats,
        }
    }

    pub async fn on_result(
        &self,
        claim: LeaseClaim,
        outcome: DeliveryOutcome,
        identity: &WorkerIdentity,
    ) -> Result<Finalized, CourierError> {
        match outcome {
            DeliveryOutcome::Success => self.on_success(claim, identity).await,
            DeliveryOutcome::Failure { reason, code } => {
                self.on_failure(claim, reason, code, identity).await
            }
        }
    }

    async fn on_success(
        &self,
        claim: LeaseClaim,
        identity: &WorkerIdentity,
    ) -> Result<Finalized, CourierError> {
        let task_id = claim.task_id;
        if !self.store.delete(task_id).await? {
            debug!(task_id = %task_id, "success for a task that is already gone");
            return Ok(Finalized::AlreadyGone);
        }
        self.stats.delivered();

        let path = identity.account_id.document_path();
        let credited = match self
            .store
            .increment(&path, BALANCE_FIELD, self.credit_amount)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(
                    task_id = %task_id,
                    account = %identity.account_id,
                    error = %e,
                    "failed to credit account"
                );
                false
            }
        };

        info!(
            task_id = %task_id,
            worker_id = %identity.worker_id,
            credited,
            "task delivered"
        );
        Ok(Finalized::Delivered { credited })
    }

    async fn on_failure(
        &self,
        claim: LeaseClaim,
        reason: String,
        code: Option<i32>,
        identity: &WorkerIdentity,
    ) -> Result<Finalized, CourierError> {
        let task_id = claim.task_id;
        let now = self.clock.now();
        let policy = self.policy;

        let finalized = transact(
            self.store.as_ref(),
            task_id,
            self.max_transaction_attempts,
            |current| match current {
                Some(task) => decide_failure(task, &claim, &reason, code, now, &policy),
                None => (WriteSet::Keep, Finalized::Missing),
            },
        )
        .await?;

        match finalized {
            Finalized::Missing => {
                debug!(task_id = %task_id, "failure for a task that no longer exists");
            }
            Finalized::Stale => {
                debug!(
                    task_id = %task_id,
                    worker_id = %identity.worker_id,
                    acquired_at = %claim.acquired_at,
                    "ignoring failure for a superseded lease"
                );
            }
            Finalized::Quarantined { retry_count } => {
                self.stats.failed();
                self.stats.quarantined();
                warn!(
                    task_id = %task_id,
                    retry_count,
                    reason = %reason,
                    code = ?code,
                    "task permanently failed"
                );
            }
            Finalized::Retrying { retry_count } => {
                self.stats.failed();
                info!(
                    task_id = %task_id,
                    retry_count,
                    reason = %reason,
                    code = ?code,
                    "delivery failed, will retry"
                );
            }
            Finalized::Delivered { .. } | Finalized::AlreadyGone => {}
        }
        Ok(finalized)
    }
}
