//! ResultListener - 非同期に届く送信結果を集約して OutcomeHandler に渡す
//!
//! # 学習ポイント
//! - 相関トークン（`LeaseClaim` = task id + リース世代）で dispatch と結果を結びつける
//! - マルチパート: 最初の失敗で確定、成功は全パート揃ったら確定
//! - 確定後・未登録のトークンへのレポートは捨てる（重複・遅延対策）
//! - 同じタスクを再リースしたら、前のリースの登録は捨てる

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, trace};

use crate::app::outcome_handler::OutcomeHandler;
use crate::domain::{DeliveryOutcome, LeaseClaim, ResultCode, WorkerIdentity};
use crate::ports::{ReportReceiver, TransportReport};

#[derive(Debug)]
struct PendingDispatch {
    parts: usize,
    delivered: BTreeSet<usize>,
}

/// 結果待ちの dispatch 一覧（clone は同じ一覧を指す）
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    pending: Arc<Mutex<HashMap<LeaseClaim, PendingDispatch>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// 送信前に登録する（結果が先に届いても取りこぼさないように）
    pub async fn register(&self, token: LeaseClaim, parts: usize) {
        let mut pending = self.pending.lock().await;
        pending.retain(|claim, _| claim.task_id != token.task_id);
        pending.insert(
            token,
            PendingDispatch {
                parts: parts.max(1),
                delivered: BTreeSet::new(),
            },
        );
    }

    /// 送信が同期的に失敗したときに登録を取り消す
    pub async fn cancel(&self, token: LeaseClaim) -> bool {
        self.pending.lock().await.remove(&token).is_some()
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 1パート分のレポートを記録し、dispatch が確定したら結果を返す
    pub async fn record(&self, report: TransportReport) -> Option<DeliveryOutcome> {
        let mut pending = self.pending.lock().await;
        let Some(entry) = pending.get_mut(&report.token) else {
            trace!(task_id = %report.token.task_id, part = report.part, "report for unknown dispatch");
            return None;
        };

        let code = ResultCode::from_code(report.code);
        if !code.is_success() {
            pending.remove(&report.token);
            return Some(code.into_outcome());
        }

        if report.part < entry.parts {
            entry.delivered.insert(report.part);
        }
        if entry.delivered.len() == entry.parts {
            pending.remove(&report.token);
            return Some(DeliveryOutcome::Success);
        }
        None
    }
}

/// レポートチャネルを読み続けるタスク
pub struct ResultListener {
    reports: ReportReceiver,
    in_flight: InFlight,
    handler: Arc<OutcomeHandler>,
    identity: WorkerIdentity,
}

impl ResultListener {
    pub fn new(
        reports: ReportReceiver,
        in_flight: InFlight,
        handler: Arc<OutcomeHandler>,
        identity: WorkerIdentity,
    ) -> Self {
        Self {
            reports,
            in_flight,
            handler,
            identity,
        }
    }

    /// shutdown まで、またはチャネルが閉じるまで処理する
    ///
    /// shutdown 時点で既にキューに入っているレポートは処理してから抜ける。
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let report = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                report = self.reports.recv() => report,
            };
            let Some(report) = report else {
                debug!(worker_id = %self.identity.worker_id, "report channel closed");
                return;
            };
            self.handle(report).await;
        }

        while let Ok(report) = self.reports.try_recv() {
            self.handle(report).await;
        }
        debug!(worker_id = %self.identity.worker_id, "result listener stopped");
    }

    async fn handle(&self, report: TransportReport) {
        let Some(outcome) = self.in_flight.record(report).await else {
            return;
        };
        if let Err(e) = self
            .handler
            .on_result(report.token, outcome, &self.identity)
            .await
        {
            error!(task_id = %report.token.task_id, error = %e, "failed to finalize task");
        }
    }
}
