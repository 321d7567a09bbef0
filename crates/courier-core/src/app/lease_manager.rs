//! LeaseManager - タスクの排他リース
//!
//! # 学習ポイント
//! - 判断（`decide_lease`、純粋関数）と実行（`try_lease`、トランザクション）の分離
//! - クエリ結果は信用せず、必ずトランザクション内で読み直す
//! - 期限切れリースの回収では、放棄された試行を1回分として数える

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::domain::{
    CourierError, LeaseOutcome, RetryDecision, RetryPolicy, RetryTrigger, TaskDocument, TaskId,
    TaskStatus, WorkerId,
};
use crate::ports::{QueueStore, WriteSet, transact};

/// リース判断に必要な設定
#[derive(Debug, Clone, Copy)]
pub struct LeaseSettings {
    pub ttl: Duration,
    pub policy: RetryPolicy,
    pub max_transaction_attempts: u32,
}

/// 1件のタスクについて何を書き込み、何を返すかを決める
///
/// ストアには触れない。`try_lease` がトランザクションの中で毎回呼ぶ。
pub fn decide_lease(
    task: &TaskDocument,
    worker: WorkerId,
    now: DateTime<Utc>,
    ttl: Duration,
    policy: &RetryPolicy,
) -> (WriteSet, LeaseOutcome) {
    match task.status {
        TaskStatus::Pending | TaskStatus::Failed => {
            let decision = policy.decide(task.retry_count, RetryTrigger::LeaseCheck);
            apply_decision(task, decision, worker, now, ttl, "retry budget exhausted")
        }
        TaskStatus::Sending => {
            if !task.lease_expired_at(now) {
                return (WriteSet::Keep, LeaseOutcome::SkippedAlreadyLeased);
            }
            let decision = policy.decide(task.retry_count, RetryTrigger::LeaseExpired);
            apply_decision(task, decision, worker, now, ttl, "lease expired")
        }
        TaskStatus::Sent | TaskStatus::PermanentlyFailed => {
            (WriteSet::Keep, LeaseOutcome::SkippedIneligible)
        }
    }
}

fn apply_decision(
    task: &TaskDocument,
    decision: RetryDecision,
    worker: WorkerId,
    now: DateTime<Utc>,
    ttl: Duration,
    exhausted_reason: &str,
) -> (WriteSet, LeaseOutcome) {
    match decision {
        RetryDecision::Proceed { retry_count } | RetryDecision::Retry { retry_count } => {
            let mut leased = task.clone();
            leased.retry_count = retry_count;
            leased.acquire_lease(worker, now, ttl);
            (
                WriteSet::Put(leased.clone()),
                LeaseOutcome::Leased(Box::new(leased)),
            )
        }
        RetryDecision::PermanentlyFail { retry_count } => {
            let mut quarantined = task.clone();
            quarantined.record_failure(
                TaskStatus::PermanentlyFailed,
                retry_count,
                exhausted_reason,
                None,
                now,
            );
            (WriteSet::Put(quarantined), LeaseOutcome::Quarantined)
        }
        RetryDecision::DeleteNow => (WriteSet::Delete, LeaseOutcome::Deleted),
    }
}

/// LeaseManager は候補タスクを1件ずつトランザクションでリースする
pub struct LeaseManager {
    store: Arc<dyn QueueStore>,
    settings: LeaseSettings,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn QueueStore>, settings: LeaseSettings) -> Self {
        Self { store, settings }
    }

    /// `candidate` のリースを試みる
    ///
    /// # エラー
    /// - コンフリクトが `max_transaction_attempts` 回続いたら `CourierError::Contention`
    /// - ストア障害は `CourierError::Store`
    pub async fn try_lease(
        &self,
        candidate: TaskId,
        worker: WorkerId,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome, CourierError> {
        let LeaseSettings {
            ttl,
            policy,
            max_transaction_attempts,
        } = self.settings;

        let outcome = transact(
            self.store.as_ref(),
            candidate,
            max_transaction_attempts,
            |current| match current {
                Some(task) => decide_lease(task, worker, now, ttl, &policy),
                None => (WriteSet::Keep, LeaseOutcome::NotFound),
            },
        )
        .await?;

        match &outcome {
            LeaseOutcome::Leased(task) => {
                info!(
                    task_id = %candidate,
                    worker_id = %worker,
                    retry_count = task.retry_count,
                    "task leased"
                );
            }
            LeaseOutcome::Deleted => {
                warn!(task_id = %candidate, "exhausted task deleted at lease time");
            }
            LeaseOutcome::Quarantined => {
                warn!(task_id = %candidate, "exhausted task marked permanently_failed");
            }
            other => {
                debug!(task_id = %candidate, outcome = other.label(), "task not leased");
            }
        }
        Ok(outcome)
    }
}
