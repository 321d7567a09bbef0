//! QueueStore port - リモートのタスクコレクション（`sms_tasks`）への型付きアクセス
//!
//! QueueStore は以下を提供します：
//! - 楽観的並行制御（`get` で version 付きスナップショット、`commit` で条件付き書き込み）
//! - status フィルタ + `createdAt` 昇順の範囲クエリ
//! - 変更通知（watch）
//! - 単発の更新・削除・数値フィールドの加算
//!
//! # 設計原則
//! - Lease の権威はここにある（クエリ結果は候補に過ぎない）
//! - 状態遷移は必ず `transact` 経由（re-read → decide → conditional write）

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::errors::CourierError;
use crate::domain::ids::TaskId;
use crate::domain::state::TaskStatus;
use crate::domain::task::{TaskDocument, TaskPatch};

/// QueueStore のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// ネットワーク断・権限エラーなど。次のトリガーで再試行する
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// 条件付き書き込みの version が一致しなかった
    #[error("write conflict on {task_id}")]
    Conflict { task_id: TaskId },

    /// watch ストリームが閉じた
    #[error("watch stream closed")]
    WatchClosed,
}

/// version 付きのドキュメント
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub task: TaskDocument,
    pub version: u64,
}

/// トランザクションの書き込み内容
#[derive(Debug, Clone, PartialEq)]
pub enum WriteSet {
    /// 読むだけ（書き込みなし）
    Keep,
    /// ドキュメント全体を置き換える
    Put(TaskDocument),
    /// ドキュメントを削除する
    Delete,
}

/// status フィルタ付きの範囲クエリ
///
/// 結果は常に `createdAt` 昇順（古いものから）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQuery {
    pub statuses: Vec<TaskStatus>,
    pub limit: usize,
}

impl TaskQuery {
    /// pending / failed のタスク（リース候補）
    pub fn leasable(limit: usize) -> Self {
        Self {
            statuses: vec![TaskStatus::Pending, TaskStatus::Failed],
            limit,
        }
    }

    /// sending のタスク（期限切れリースの回収候補）
    pub fn sending(limit: usize) -> Self {
        Self {
            statuses: vec![TaskStatus::Sending],
            limit,
        }
    }

    pub fn matches(&self, task: &TaskDocument) -> bool {
        self.statuses.contains(&task.status)
    }
}

/// QueueStore はタスクコレクションの正本（source of truth）
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数ワーカーから共有される）
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// 1件読む。存在しなければ `None`
    async fn get(&self, id: TaskId) -> Result<Option<Snapshot>, StoreError>;

    /// `expected_version` が現在の version と一致するときだけ書き込む
    ///
    /// 一致しない（または削除済み）なら `StoreError::Conflict`。
    async fn commit(
        &self,
        id: TaskId,
        expected_version: u64,
        write: WriteSet,
    ) -> Result<(), StoreError>;

    async fn query(&self, query: &TaskQuery) -> Result<Vec<TaskDocument>, StoreError>;

    /// クエリ結果が変わるたびに結果セット全体を流す
    ///
    /// 最初の結果セットは購読直後に届く。ストアのエラーでストリームは閉じる。
    async fn watch(&self, query: TaskQuery) -> Result<mpsc::Receiver<Vec<TaskDocument>>, StoreError>;

    /// 部分更新。ドキュメントが無ければ `Ok(false)`
    async fn update(&self, id: TaskId, patch: &TaskPatch) -> Result<bool, StoreError>;

    /// 削除。ドキュメントが無ければ `Ok(false)`
    async fn delete(&self, id: TaskId) -> Result<bool, StoreError>;

    /// `path` のドキュメントの数値フィールドに `amount` を加算する
    ///
    /// ドキュメントやフィールドが無ければ 0 から加算する。
    async fn increment(&self, path: &str, field: &str, amount: f64) -> Result<(), StoreError>;
}

/// Re-read → decide → conditional write を、競合したら最初からやり直す
///
/// `decide` には最新のドキュメント（無ければ `None`）が渡され、書き込み内容と
/// 呼び出し側に返す値を返す。`WriteSet::Keep` のときは commit しない。
///
/// `max_attempts` 回続けて競合したら `CourierError::Contention`。
pub async fn transact<S, F, T>(
    store: &S,
    id: TaskId,
    max_attempts: u32,
    mut decide: F,
) -> Result<T, CourierError>
where
    S: QueueStore + ?Sized,
    F: FnMut(Option<&TaskDocument>) -> (WriteSet, T),
{
    for attempt in 1..=max_attempts {
        let Some(snapshot) = store.get(id).await? else {
            let (_, value) = decide(None);
            return Ok(value);
        };

        let (write, value) = decide(Some(&snapshot.task));
        if matches!(write, WriteSet::Keep) {
            return Ok(value);
        }

        match store.commit(id, snapshot.version, write).await {
            Ok(()) => return Ok(value),
            Err(StoreError::Conflict { .. }) => {
                debug!(task_id = %id, attempt, "transaction conflict, re-reading");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(CourierError::Contention {
        task_id: id,
        attempts: max_attempts,
    })
}
