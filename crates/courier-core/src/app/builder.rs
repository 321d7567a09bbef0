//! WorkerBuilder - ワーカーの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: アカウント未設定・部品不足は build() で弾く
//! - 部品同士の配線（OutcomeHandler を Dispatcher と ResultListener で共有）

use std::sync::Arc;

use tracing::info;

use crate::app::dispatcher::Dispatcher;
use crate::app::lease_manager::{LeaseManager, LeaseSettings};
use crate::app::outcome_handler::OutcomeHandler;
use crate::app::poll_loop::{PollLoop, PollSettings};
use crate::app::result_listener::{InFlight, ResultListener};
use crate::app::status::WorkerStats;
use crate::app::worker::Worker;
use crate::config::{ConfigError, WorkerConfig};
use crate::domain::WorkerIdentity;
use crate::ports::{
    Clock, IdGenerator, QueueStore, ReportReceiver, SystemClock, TransportSelector, TriggerSource,
    UlidGenerator,
};

/// BuildError はワーカー構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no account bound: set account_id before starting a worker")]
    MissingAccount,

    #[error("missing component: {0}. Call WorkerBuilder::{0}() before build().")]
    MissingComponent(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// WorkerBuilder はワーカーを構築
///
/// # 使用例
/// ```ignore
/// let (reports_tx, reports_rx) = report_channel();
/// let sim = Arc::new(SimulatedTransport::new(0, reports_tx, Behaviour::AlwaysOk));
/// let worker = WorkerBuilder::new(WorkerConfig::for_account("alice"))
///     .store(store.clone())
///     .selector(Arc::new(SlotSelector::single(sim)))
///     .reports(reports_rx)
///     .build()?;
/// let handle = worker.spawn();
/// ```
pub struct WorkerBuilder {
    config: WorkerConfig,
    store: Option<Arc<dyn QueueStore>>,
    selector: Option<Arc<dyn TransportSelector>>,
    reports: Option<ReportReceiver>,
    trigger: Option<Box<dyn TriggerSource>>,
    clock: Arc<dyn Clock>,
}

impl WorkerBuilder {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            store: None,
            selector: None,
            reports: None,
            trigger: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn selector(mut self, selector: Arc<dyn TransportSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Transport 実装に渡した `ReportSender` の受信側
    pub fn reports(mut self, reports: ReportReceiver) -> Self {
        self.reports = Some(reports);
        self
    }

    /// 省略時は `poll_interval_secs` 間隔の IntervalTrigger
    pub fn trigger(mut self, trigger: Box<dyn TriggerSource>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 検証して Worker を組み立てる（まだ起動はしない）
    pub fn build(self) -> Result<Worker, BuildError> {
        self.config.validate()?;
        let config = self.config;

        let account_id = config.account_id.clone().ok_or(BuildError::MissingAccount)?;
        let store = self.store.ok_or(BuildError::MissingComponent("store"))?;
        let selector = self.selector.ok_or(BuildError::MissingComponent("selector"))?;
        let reports = self.reports.ok_or(BuildError::MissingComponent("reports"))?;

        let worker_id = match config.worker_id {
            Some(id) => id,
            None => UlidGenerator::new(self.clock.clone()).generate_worker_id(),
        };
        let identity = WorkerIdentity::new(worker_id, account_id);
        let stats = Arc::new(WorkerStats::new());
        let policy = config.retry_policy();

        let handler = Arc::new(OutcomeHandler::new(
            store.clone(),
            self.clock.clone(),
            policy,
            config.credit_amount,
            config.max_transaction_attempts,
            stats.clone(),
        ));
        let in_flight = InFlight::new();
        let dispatcher = Dispatcher::new(
            selector,
            in_flight.clone(),
            handler.clone(),
            config.segment_length,
            stats.clone(),
        );
        let leases = LeaseManager::new(
            store.clone(),
            LeaseSettings {
                ttl: config.lease_ttl(),
                policy,
                max_transaction_attempts: config.max_transaction_attempts,
            },
        );
        let poll_loop = PollLoop::new(
            identity.clone(),
            store,
            leases,
            dispatcher,
            self.clock,
            PollSettings {
                batch_size: config.batch_size,
                expiry_scan_window: config.expiry_scan_window,
                max_leases_per_cycle: config.max_leases_per_cycle,
                keepalive: config.keepalive(),
                store_retry_delay: config.store_retry_delay(),
            },
            stats.clone(),
        );
        let listener = ResultListener::new(reports, in_flight, handler, identity.clone());

        info!(
            worker_id = %identity.worker_id,
            account = %identity.account_id,
            lease_ttl_secs = config.lease_ttl_secs,
            max_retries = config.max_retries,
            "worker built"
        );
        Ok(Worker::new(
            identity,
            poll_loop,
            listener,
            self.trigger,
            config.poll_interval(),
            stats,
        ))
    }
}
