//! Dispatcher - リース済みタスクを Transport に渡す
//!
//! 結果は待たない。送信前のチェックで弾いたもの、Transport が同期的に
//! 拒否したものだけは、その場で OutcomeHandler に失敗として渡す。

use std::sync::{Arc, LazyLock};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::app::outcome_handler::{Finalized, OutcomeHandler};
use crate::app::result_listener::InFlight;
use crate::app::status::WorkerStats;
use crate::domain::{CourierError, DeliveryOutcome, LeaseClaim, TaskDocument, WorkerIdentity};
use crate::ports::{SendRequest, TransportSelector};

/// 宛先として受け付ける形式（E.164 風、または国番号なしの数字列）
static DESTINATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"^\+?[1-9]\d{6,14}$", r"^[0-9]{10,15}$"]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("destination is empty")]
    EmptyDestination,

    #[error("payload is empty")]
    EmptyPayload,

    #[error("malformed destination {0:?}")]
    MalformedDestination(String),
}

/// 宛先と本文の形式チェック
pub fn validate(task: &TaskDocument) -> Result<(), ValidationError> {
    let destination = task.destination.trim();
    if destination.is_empty() {
        return Err(ValidationError::EmptyDestination);
    }
    if task.payload.trim().is_empty() {
        return Err(ValidationError::EmptyPayload);
    }
    if !DESTINATION_PATTERNS.iter().any(|re| re.is_match(destination)) {
        return Err(ValidationError::MalformedDestination(destination.to_string()));
    }
    Ok(())
}

/// 本文を `segment_length` 文字ごとに分割する
pub fn segment(payload: &str, segment_length: usize) -> Vec<String> {
    let segment_length = segment_length.max(1);
    let chars: Vec<char> = payload.chars().collect();
    if chars.len() <= segment_length {
        return vec![payload.to_string()];
    }
    chars
        .chunks(segment_length)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// `dispatch` の結果
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Transport に渡した。結果は後から ResultListener に届く
    Sent { slot: usize, parts: usize },
    /// 送信前に失敗として確定させた
    Rejected(Finalized),
    /// このワーカーのリースが付いていなかった。何もしない
    NotLeased,
}

pub struct Dispatcher {
    selector: Arc<dyn TransportSelector>,
    in_flight: InFlight,
    handler: Arc<OutcomeHandler>,
    segment_length: usize,
    stats: Arc<WorkerStats>,
}

impl Dispatcher {
    pub fn new(
        selector: Arc<dyn TransportSelector>,
        in_flight: InFlight,
        handler: Arc<OutcomeHandler>,
        segment_length: usize,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            selector,
            in_flight,
            handler,
            segment_length,
            stats,
        }
    }

    /// リース済みの `task` を送信に回す
    ///
    /// # エラー
    /// 送信前の失敗を書き込むときのストア障害のみ
    pub async fn dispatch(
        &self,
        task: &TaskDocument,
        identity: &WorkerIdentity,
    ) -> Result<Dispatch, CourierError> {
        let Some(claim) = LeaseClaim::of(task).filter(|c| c.holder == identity.worker_id) else {
            warn!(
                task_id = %task.id,
                worker_id = %identity.worker_id,
                holder = ?task.lease_holder,
                "refusing to dispatch a task this worker does not hold"
            );
            return Ok(Dispatch::NotLeased);
        };

        if let Err(e) = validate(task) {
            warn!(task_id = %task.id, error = %e, "task failed validation");
            return self.reject(claim, DeliveryOutcome::validation_failed(e), identity).await;
        }

        let Some(transport) = self.selector.select(task.preferred_slot) else {
            warn!(task_id = %task.id, "no active transport");
            return self
                .reject(claim, DeliveryOutcome::failure("no active transport"), identity)
                .await;
        };

        let parts = segment(&task.payload, self.segment_length);
        let part_count = parts.len();
        self.in_flight.register(claim, part_count).await;

        let request = SendRequest {
            token: claim,
            destination: task.destination.trim().to_string(),
            parts,
        };
        if let Err(e) = transport.send(request) {
            self.in_flight.cancel(claim).await;
            warn!(task_id = %task.id, slot = transport.slot(), error = %e, "transport refused message");
            return self
                .reject(claim, DeliveryOutcome::failure(e.to_string()), identity)
                .await;
        }

        self.stats.dispatched();
        debug!(
            task_id = %task.id,
            slot = transport.slot(),
            parts = part_count,
            "handed to transport"
        );
        Ok(Dispatch::Sent {
            slot: transport.slot(),
            parts: part_count,
        })
    }

    async fn reject(
        &self,
        claim: LeaseClaim,
        outcome: DeliveryOutcome,
        identity: &WorkerIdentity,
    ) -> Result<Dispatch, CourierError> {
        let finalized = self.handler.on_result(claim, outcome, identity).await?;
        Ok(Dispatch::Rejected(finalized))
    }
}
