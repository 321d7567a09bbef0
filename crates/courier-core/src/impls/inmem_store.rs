//! InMemoryQueueStore - 開発・テスト用のタスクストア
//!
//! # 学習ポイント
//! - version 付きドキュメントによる楽観的並行制御
//! - `tokio::sync::watch` による変更通知と、それを使った watch ストリーム
//! - 障害注入（ストア停止、強制コンフリクト）

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::trace;

use crate::app::status::StatusCounts;
use crate::domain::ids::{AccountId, TaskId};
use crate::domain::task::{TaskDocument, TaskPatch};
use crate::ports::{QueueStore, Snapshot, StoreError, TaskQuery, WriteSet};

/// watch ストリームのバッファ
const WATCH_BUFFER: usize = 16;

struct Versioned {
    task: TaskDocument,
    version: u64,
}

/// In-memory store state.
#[derive(Default)]
struct StoreState {
    /// All task documents (single source of truth).
    tasks: HashMap<TaskId, Versioned>,

    /// Numeric fields of non-task documents, keyed by (path, field).
    fields: HashMap<(String, String), f64>,

    /// Version counter shared by every document.
    next_version: u64,

    /// When set, every operation fails with `StoreError::Unavailable`.
    unavailable: Option<String>,

    /// Remaining forced conflicts per task.
    forced_conflicts: HashMap<TaskId, u32>,
}

impl StoreState {
    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn check_available(&self) -> Result<(), StoreError> {
        match &self.unavailable {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn run_query(&self, query: &TaskQuery) -> Vec<TaskDocument> {
        let mut matched: Vec<&TaskDocument> = self
            .tasks
            .values()
            .map(|v| &v.task)
            .filter(|task| query.matches(task))
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matched.into_iter().take(query.limit).cloned().collect()
    }

    fn counts_by_status(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for v in self.tasks.values() {
            counts.record(v.task.status);
        }
        counts
    }
}

/// InMemoryQueueStore は開発用のタスクストア
///
/// # 実装詳細
/// - `Arc<Mutex<StoreState>>` で排他制御（clone は同じストアを指す）
/// - 書き込みのたびに revision を進め、watch 購読者に通知
///
/// # 使用例
/// ```ignore
/// let store = InMemoryQueueStore::new();
/// store.insert(TaskDocument::new_pending(id, "+15551234567", "hi", now)).await;
/// let pending = store.query(&TaskQuery::leasable(10)).await?;
/// ```
#[derive(Clone)]
pub struct InMemoryQueueStore {
    state: Arc<Mutex<StoreState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            revision: Arc::new(revision),
        }
    }

    fn notify_changed(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// タスクを投入（プロデューサ側の書き込み）
    pub async fn insert(&self, task: TaskDocument) {
        {
            let mut state = self.state.lock().await;
            let version = state.bump_version();
            state.tasks.insert(task.id, Versioned { task, version });
        }
        self.notify_changed();
    }

    /// 現在のドキュメント（テスト・集計用、障害注入を無視する）
    pub async fn peek(&self, id: TaskId) -> Option<TaskDocument> {
        let state = self.state.lock().await;
        state.tasks.get(&id).map(|v| v.task.clone())
    }

    pub async fn all_tasks(&self) -> Vec<TaskDocument> {
        let state = self.state.lock().await;
        let mut tasks: Vec<TaskDocument> = state.tasks.values().map(|v| v.task.clone()).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// 数値フィールドの現在値（無ければ 0）
    pub async fn field_value(&self, path: &str, field: &str) -> f64 {
        let state = self.state.lock().await;
        state
            .fields
            .get(&(path.to_string(), field.to_string()))
            .copied()
            .unwrap_or(0.0)
    }

    /// アカウントの残高
    pub async fn balance(&self, account: &AccountId) -> f64 {
        self.field_value(&account.document_path(), "balance").await
    }

    /// Get counts by status for observability.
    pub async fn counts_by_status(&self) -> StatusCounts {
        let state = self.state.lock().await;
        state.counts_by_status()
    }

    /// ストアを停止/復旧させる（停止中は全操作がエラー、watch は閉じる）
    pub async fn set_unavailable(&self, reason: Option<&str>) {
        {
            let mut state = self.state.lock().await;
            state.unavailable = reason.map(str::to_string);
        }
        self.notify_changed();
    }

    /// 次の `times` 回の commit を強制的にコンフリクトさせる
    pub async fn inject_conflicts(&self, id: TaskId, times: u32) {
        let mut state = self.state.lock().await;
        state.forced_conflicts.insert(id, times);
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn get(&self, id: TaskId) -> Result<Option<Snapshot>, StoreError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.tasks.get(&id).map(|v| Snapshot {
            task: v.task.clone(),
            version: v.version,
        }))
    }

    async fn commit(
        &self,
        id: TaskId,
        expected_version: u64,
        write: WriteSet,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.state.lock().await;
            state.check_available()?;

            if let Some(remaining) = state.forced_conflicts.get_mut(&id)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(StoreError::Conflict { task_id: id });
            }

            let current = state.tasks.get(&id).map(|v| v.version);
            if current != Some(expected_version) {
                trace!(task_id = %id, expected_version, ?current, "commit rejected");
                return Err(StoreError::Conflict { task_id: id });
            }

            match write {
                WriteSet::Keep => return Ok(()),
                WriteSet::Put(task) => {
                    let version = state.bump_version();
                    state.tasks.insert(id, Versioned { task, version });
                }
                WriteSet::Delete => {
                    state.tasks.remove(&id);
                }
            }
        }
        self.notify_changed();
        Ok(())
    }

    async fn query(&self, query: &TaskQuery) -> Result<Vec<TaskDocument>, StoreError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.run_query(query))
    }

    async fn watch(
        &self,
        query: TaskQuery,
    ) -> Result<mpsc::Receiver<Vec<TaskDocument>>, StoreError> {
        let mut revision = self.revision.subscribe();
        let initial = {
            let state = self.state.lock().await;
            state.check_available()?;
            state.run_query(&query)
        };

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let mut last = initial;
            if tx.send(last.clone()).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    _ = tx.closed() => return,
                    changed = revision.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }

                let current = {
                    let state = state.lock().await;
                    if state.unavailable.is_some() {
                        // drop tx: 購読者にはストリーム終了として見える
                        return;
                    }
                    state.run_query(&query)
                };
                if current != last {
                    if tx.send(current.clone()).await.is_err() {
                        return;
                    }
                    last = current;
                }
            }
        });

        Ok(rx)
    }

    async fn update(&self, id: TaskId, patch: &TaskPatch) -> Result<bool, StoreError> {
        {
            let mut state = self.state.lock().await;
            state.check_available()?;
            let version = state.bump_version();
            let Some(entry) = state.tasks.get_mut(&id) else {
                return Ok(false);
            };
            patch.apply(&mut entry.task);
            entry.version = version;
        }
        self.notify_changed();
        Ok(true)
    }

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        let removed = {
            let mut state = self.state.lock().await;
            state.check_available()?;
            state.tasks.remove(&id).is_some()
        };
        if removed {
            self.notify_changed();
        }
        Ok(removed)
    }

    async fn increment(&self, path: &str, field: &str, amount: f64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        *state
            .fields
            .entry((path.to_string(), field.to_string()))
            .or_insert(0.0) += amount;
        Ok(())
    }
}
