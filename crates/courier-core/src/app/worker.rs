//! Worker - PollLoop と ResultListener をまとめて起動・停止する

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::app::poll_loop::PollLoop;
use crate::app::result_listener::ResultListener;
use crate::app::status::{StatsSnapshot, WorkerStats};
use crate::domain::WorkerIdentity;
use crate::impls::IntervalTrigger;
use crate::ports::TriggerSource;

/// 組み立て済みで未起動のワーカー（`WorkerBuilder::build` が返す）
pub struct Worker {
    identity: WorkerIdentity,
    poll_loop: PollLoop,
    listener: ResultListener,
    trigger: Option<Box<dyn TriggerSource>>,
    poll_interval: Duration,
    stats: Arc<WorkerStats>,
}

impl Worker {
    pub(crate) fn new(
        identity: WorkerIdentity,
        poll_loop: PollLoop,
        listener: ResultListener,
        trigger: Option<Box<dyn TriggerSource>>,
        poll_interval: Duration,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            identity,
            poll_loop,
            listener,
            trigger,
            poll_interval,
            stats,
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// 1サイクルだけ実行する（起動せずに使うとき）
    pub fn poll_loop(&self) -> &PollLoop {
        &self.poll_loop
    }

    /// PollLoop と ResultListener をそれぞれ tokio タスクとして起動する
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let trigger: Box<dyn TriggerSource> = match self.trigger {
            Some(trigger) => trigger,
            None => Box::new(IntervalTrigger::new(self.poll_interval)),
        };

        let poll = tokio::spawn(self.poll_loop.run(trigger, shutdown_rx.clone()));
        let listener = tokio::spawn(self.listener.run(shutdown_rx));

        info!(worker_id = %self.identity.worker_id, "worker started");
        WorkerHandle {
            identity: self.identity,
            stats: self.stats,
            shutdown_tx,
            joins: vec![poll, listener],
        }
    }
}

/// Worker handle.
/// - `request_shutdown` で新しいリースを取らなくなる（送信済みの結果は処理してから止まる）
/// - `shutdown_and_join()` で全タスクの終了を待てる
pub struct WorkerHandle {
    identity: WorkerIdentity,
    stats: Arc<WorkerStats>,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for the loop and the listener.
    pub async fn shutdown_and_join(self) -> StatsSnapshot {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
        info!(worker_id = %self.identity.worker_id, "worker stopped");
        self.stats.snapshot()
    }
}
