//! SimulatedTransport - 開発・テスト用の送信チャネル
//!
//! 実際には何も送らず、設定された振る舞いに従って結果レポートを流す。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::domain::outcome::ResultCode;
use crate::domain::LeaseClaim;
use crate::ports::{ReportSender, SendRequest, Transport, TransportError, TransportReport};

/// 結果の返し方
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behaviour {
    /// 全パート OK を即座に報告
    AlwaysOk,
    /// n 回に1回、全パートを generic failure として報告
    FailEvery(u64),
    /// 送信ごとに先頭のコードを1つ取り出し全パートに使う（尽きたら OK）
    Scripted(VecDeque<i32>),
    /// 何も報告しない（テストが `report` で手動で返す、または結果が失われる）
    Silent,
    /// `send` 自体を同期的に拒否する
    Reject(String),
}

pub struct SimulatedTransport {
    slot: usize,
    active: AtomicBool,
    reports: ReportSender,
    behaviour: Mutex<Behaviour>,
    sent: Mutex<Vec<SendRequest>>,
    sends: AtomicU64,
}

impl SimulatedTransport {
    pub fn new(slot: usize, reports: ReportSender, behaviour: Behaviour) -> Self {
        Self {
            slot,
            active: AtomicBool::new(true),
            reports,
            behaviour: Mutex::new(behaviour),
            sent: Mutex::new(Vec::new()),
            sends: AtomicU64::new(0),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap_or_else(|e| e.into_inner()) = behaviour;
    }

    /// 受け付けた送信依頼の履歴
    pub fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 手動で1パート分の結果を報告する
    pub fn report(&self, token: LeaseClaim, part: usize, code: i32) {
        // listener が止まっていれば捨てる
        let _ = self.reports.send(TransportReport { token, part, code });
    }

    fn next_code(behaviour: &mut Behaviour, n: u64) -> Option<i32> {
        match behaviour {
            Behaviour::AlwaysOk => Some(ResultCode::OK),
            Behaviour::FailEvery(every) if *every > 0 && n % *every == 0 => {
                Some(ResultCode::GENERIC_FAILURE)
            }
            Behaviour::FailEvery(_) => Some(ResultCode::OK),
            Behaviour::Scripted(codes) => Some(codes.pop_front().unwrap_or(ResultCode::OK)),
            Behaviour::Silent | Behaviour::Reject(_) => None,
        }
    }
}

impl Transport for SimulatedTransport {
    fn slot(&self) -> usize {
        self.slot
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn send(&self, request: SendRequest) -> Result<(), TransportError> {
        if !self.is_active() {
            return Err(TransportError::Unavailable(format!("slot {} is off", self.slot)));
        }

        let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        let code = {
            let mut behaviour = self.behaviour.lock().unwrap_or_else(|e| e.into_inner());
            if let Behaviour::Reject(reason) = &*behaviour {
                return Err(TransportError::Rejected(reason.clone()));
            }
            Self::next_code(&mut behaviour, n)
        };

        let token = request.token;
        let parts = request.parts.len();
        debug!(slot = self.slot, task_id = %token.task_id, parts, "simulated send");
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        if let Some(code) = code {
            for part in 0..parts {
                self.report(token, part, code);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, WorkerId};
    use crate::ports::report_channel;
    use chrono::Utc;
    use ulid::Ulid;

    fn request(parts: usize) -> SendRequest {
        SendRequest {
            token: LeaseClaim {
                task_id: TaskId::from_ulid(Ulid::new()),
                holder: WorkerId::from_ulid(Ulid::new()),
                acquired_at: Utc::now(),
            },
            destination: "+15551234567".into(),
            parts: vec!["x".into(); parts],
        }
    }

    #[tokio::test]
    async fn reports_one_result_per_part() {
        let (tx, mut rx) = report_channel();
        let transport = SimulatedTransport::new(0, tx, Behaviour::AlwaysOk);

        let req = request(3);
        let token = req.token;
        transport.send(req).unwrap();

        for part in 0..3 {
            let report = rx.recv().await.unwrap();
            assert_eq!(report, TransportReport { token, part, code: ResultCode::OK });
        }
    }

    #[test]
    fn fail_every_fails_the_nth_send() {
        let (tx, mut rx) = report_channel();
        let transport = SimulatedTransport::new(0, tx, Behaviour::FailEvery(2));

        transport.send(request(1)).unwrap();
        transport.send(request(1)).unwrap();

        assert_eq!(rx.try_recv().unwrap().code, ResultCode::OK);
        assert_eq!(rx.try_recv().unwrap().code, ResultCode::GENERIC_FAILURE);
    }

    #[test]
    fn silent_transport_records_but_never_reports() {
        let (tx, mut rx) = report_channel();
        let transport = SimulatedTransport::new(0, tx, Behaviour::Silent);

        transport.send(request(1)).unwrap();

        assert_eq!(transport.sent_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn inactive_or_rejecting_transport_errors_synchronously() {
        let (tx, _rx) = report_channel();
        let transport = SimulatedTransport::new(1, tx, Behaviour::Reject("no credit".into()));

        let err = transport.send(request(1)).unwrap_err();
        assert_eq!(err, TransportError::Rejected("no credit".into()));

        transport.set_active(false);
        assert!(matches!(
            transport.send(request(1)),
            Err(TransportError::Unavailable(_))
        ));
        assert_eq!(transport.sent_count(), 0);
    }
}
