//! PollLoop - トリガーごとに候補を集めてリース・送信する
//!
//! # 学習ポイント
//! - 1サイクル = 候補クエリ → リース → dispatch（+ 期限切れリースの回収）
//! - `tokio::select!` で shutdown / 定期トリガー / watch 通知 / keepalive を待つ
//! - ストア障害時は watch を外し、一定時間後に付け直す

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::app::dispatcher::Dispatcher;
use crate::app::lease_manager::LeaseManager;
use crate::app::status::WorkerStats;
use crate::domain::{CourierError, ErrorKind, LeaseOutcome, TaskDocument, TaskId, WorkerIdentity};
use crate::ports::{Clock, QueueStore, TaskQuery, TriggerSource};

/// PollLoop の設定
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub batch_size: usize,
    pub expiry_scan_window: usize,
    pub max_leases_per_cycle: usize,
    pub keepalive: Duration,
    pub store_retry_delay: Duration,
}

/// 1サイクルの集計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub leased: usize,
    pub reclaimed: usize,
    pub deleted: usize,
    pub quarantined: usize,
    pub skipped: usize,
    pub contended: usize,
    /// リース上限に達して見送った候補があった
    pub rate_limited: bool,
}

pub struct PollLoop {
    identity: WorkerIdentity,
    store: Arc<dyn QueueStore>,
    leases: LeaseManager,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    settings: PollSettings,
    stats: Arc<WorkerStats>,
}

impl PollLoop {
    pub fn new(
        identity: WorkerIdentity,
        store: Arc<dyn QueueStore>,
        leases: LeaseManager,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        settings: PollSettings,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            identity,
            store,
            leases,
            dispatcher,
            clock,
            settings,
            stats,
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// 1サイクル実行する
    ///
    /// # エラー
    /// クエリ・書き込みでストアが使えなかったとき（サイクルはそこで打ち切り）。
    /// 個々の候補のコンフリクトは見送りとして数えるだけ。
    pub async fn run_cycle(&self) -> Result<CycleReport, CourierError> {
        self.stats.cycle();
        let mut report = CycleReport::default();

        let candidates = self
            .store
            .query(&TaskQuery::leasable(self.settings.batch_size))
            .await?;
        report.candidates = candidates.len();
        for task in &candidates {
            if !self.lease_and_dispatch(task.id, &mut report).await? {
                break;
            }
        }

        if !report.rate_limited {
            let now = self.clock.now();
            let in_flight = self
                .store
                .query(&TaskQuery::sending(self.settings.expiry_scan_window))
                .await?;
            let expired: Vec<&TaskDocument> = in_flight
                .iter()
                .filter(|task| task.lease_expired_at(now))
                .collect();
            for task in expired {
                debug!(
                    task_id = %task.id,
                    holder = ?task.lease_holder,
                    "found expired lease"
                );
                let before = report.leased;
                if !self.lease_and_dispatch(task.id, &mut report).await? {
                    break;
                }
                report.reclaimed += report.leased - before;
            }
        }

        debug!(
            worker_id = %self.identity.worker_id,
            candidates = report.candidates,
            leased = report.leased,
            reclaimed = report.reclaimed,
            rate_limited = report.rate_limited,
            "cycle finished"
        );
        Ok(report)
    }

    /// 1件リースを試み、取れたら dispatch する。上限に達していたら `false`
    async fn lease_and_dispatch(
        &self,
        id: TaskId,
        report: &mut CycleReport,
    ) -> Result<bool, CourierError> {
        if report.leased >= self.settings.max_leases_per_cycle {
            report.rate_limited = true;
            return Ok(false);
        }

        let outcome = match self
            .leases
            .try_lease(id, self.identity.worker_id, self.clock.now())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) if e.kind() == ErrorKind::Transient => {
                warn!(task_id = %id, error = %e, "skipping contended task");
                report.contended += 1;
                self.stats.skipped();
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        match outcome {
            LeaseOutcome::Leased(task) => {
                report.leased += 1;
                self.stats.leased();
                self.dispatcher.dispatch(&task, &self.identity).await?;
            }
            LeaseOutcome::Deleted => {
                report.deleted += 1;
                self.stats.deleted();
            }
            LeaseOutcome::Quarantined => {
                report.quarantined += 1;
                self.stats.quarantined();
            }
            LeaseOutcome::SkippedAlreadyLeased
            | LeaseOutcome::SkippedIneligible
            | LeaseOutcome::NotFound => {
                report.skipped += 1;
                self.stats.skipped();
            }
        }
        Ok(true)
    }

    /// shutdown まで回し続ける
    ///
    /// - `trigger` の発火ごと、watch の結果セットが変わるごとに1サイクル
    /// - keepalive 周期で watch を付け直す
    /// - ストア障害後は `store_retry_delay` 待ってから付け直す
    pub async fn run(self, mut trigger: Box<dyn TriggerSource>, mut shutdown: watch::Receiver<bool>) {
        let worker_id = self.identity.worker_id;
        info!(worker_id = %worker_id, account = %self.identity.account_id, "poll loop started");

        let mut keepalive = tokio::time::interval_at(
            Instant::now() + self.settings.keepalive,
            self.settings.keepalive,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stream: Option<mpsc::Receiver<Vec<TaskDocument>>> = None;
        let mut reattach_at = Some(Instant::now());

        loop {
            if *shutdown.borrow() {
                break;
            }

            if stream.is_none()
                && let Some(at) = reattach_at
                && at <= Instant::now()
            {
                match self
                    .store
                    .watch(TaskQuery::leasable(self.settings.batch_size))
                    .await
                {
                    Ok(rx) => {
                        debug!(worker_id = %worker_id, "store watch attached");
                        stream = Some(rx);
                        reattach_at = None;
                    }
                    Err(e) => {
                        self.stats.store_error();
                        warn!(worker_id = %worker_id, error = %e, "failed to attach store watch");
                        reattach_at = Some(Instant::now() + self.settings.store_retry_delay);
                    }
                }
            }

            let woke = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = trigger.next_tick() => Wake::Tick,
                batch = next_batch(&mut stream) => match batch {
                    Some(_) => Wake::Changed,
                    None => Wake::WatchClosed,
                },
                _ = keepalive.tick() => Wake::Keepalive,
                _ = sleep_until_opt(reattach_at) => continue,
            };

            match woke {
                Wake::Tick | Wake::Changed => {
                    if let Err(e) = self.run_cycle().await {
                        self.stats.store_error();
                        error!(worker_id = %worker_id, error = %e, "poll cycle failed");
                        if e.kind() == ErrorKind::Infrastructure {
                            stream = None;
                            reattach_at = Some(Instant::now() + self.settings.store_retry_delay);
                        }
                    }
                }
                Wake::WatchClosed => {
                    self.stats.store_error();
                    warn!(worker_id = %worker_id, "store watch closed, will re-attach");
                    stream = None;
                    reattach_at = Some(Instant::now() + self.settings.store_retry_delay);
                }
                Wake::Keepalive => {
                    // 長時間つなぎっぱなしの watch は黙って死ぬことがあるので付け直す
                    if stream.is_some() {
                        debug!(worker_id = %worker_id, "keepalive: re-attaching store watch");
                        stream = None;
                        reattach_at = Some(Instant::now());
                    }
                }
            }
        }

        info!(worker_id = %worker_id, "poll loop stopped");
    }
}

enum Wake {
    Tick,
    Changed,
    WatchClosed,
    Keepalive,
}

async fn next_batch(
    stream: &mut Option<mpsc::Receiver<Vec<TaskDocument>>>,
) -> Option<Vec<TaskDocument>> {
    match stream {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::lease_manager::LeaseSettings;
    use crate::app::outcome_handler::OutcomeHandler;
    use crate::app::result_listener::InFlight;
    use crate::domain::{AccountId, RetryPolicy, TaskStatus, WorkerId};
    use crate::impls::{Behaviour, InMemoryQueueStore, SimulatedTransport, SlotSelector};
    use crate::ports::{FixedClock, Transport, report_channel};
    use chrono::{DateTime, TimeZone, Utc};
    use ulid::Ulid;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn settings(max_leases_per_cycle: usize) -> PollSettings {
        PollSettings {
            batch_size: 10,
            expiry_scan_window: 20,
            max_leases_per_cycle,
            keepalive: Duration::from_secs(300),
            store_retry_delay: Duration::from_secs(30),
        }
    }

    fn poll_loop(store: Arc<InMemoryQueueStore>, clock: FixedClock, max_leases: usize) -> PollLoop {
        let (tx, _rx) = report_channel();
        let transport: Arc<dyn Transport> =
            Arc::new(SimulatedTransport::new(0, tx, Behaviour::Silent));
        let stats = Arc::new(WorkerStats::new());
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let identity = WorkerIdentity::new(WorkerId::from_ulid(Ulid::new()), AccountId::new("a"));
        let handler = Arc::new(OutcomeHandler::new(
            store.clone(),
            clock.clone(),
            RetryPolicy::default(),
            0.20,
            5,
            stats.clone(),
        ));
        let leases = LeaseManager::new(
            store.clone(),
            LeaseSettings {
                ttl: chrono::Duration::seconds(120),
                policy: RetryPolicy::default(),
                max_transaction_attempts: 5,
            },
        );
        let dispatcher = Dispatcher::new(
            Arc::new(SlotSelector::single(transport)),
            InFlight::new(),
            handler,
            160,
            stats.clone(),
        );
        PollLoop::new(
            identity,
            store,
            leases,
            dispatcher,
            clock,
            settings(max_leases),
            stats,
        )
    }

    async fn seed(store: &InMemoryQueueStore, n: u32) -> Vec<TaskDocument> {
        let mut tasks = Vec::new();
        for i in 0..n {
            let task = TaskDocument::new_pending(
                TaskId::from_ulid(Ulid::new()),
                "+15551234567",
                format!("message {i}"),
                start() - chrono::Duration::minutes(i64::from(60 - i)),
            );
            store.insert(task.clone()).await;
            tasks.push(task);
        }
        tasks
    }

    #[tokio::test]
    async fn cycle_leases_oldest_first_up_to_rate_limit() {
        let store = Arc::new(InMemoryQueueStore::new());
        let tasks = seed(&store, 7).await;
        let lp = poll_loop(store.clone(), FixedClock::new(start()), 5);

        let report = lp.run_cycle().await.unwrap();

        assert_eq!(report.candidates, 7);
        assert_eq!(report.leased, 5);
        assert!(report.rate_limited);
        for task in &tasks[..5] {
            assert_eq!(store.peek(task.id).await.unwrap().status, TaskStatus::Sending);
        }
        for task in &tasks[5..] {
            assert_eq!(store.peek(task.id).await.unwrap().status, TaskStatus::Pending);
        }
    }

    #[tokio::test]
    async fn second_cycle_skips_held_leases_and_takes_the_rest() {
        let store = Arc::new(InMemoryQueueStore::new());
        seed(&store, 7).await;
        let lp = poll_loop(store.clone(), FixedClock::new(start()), 5);

        lp.run_cycle().await.unwrap();
        let report = lp.run_cycle().await.unwrap();

        assert_eq!(report.leased, 2);
        assert_eq!(store.counts_by_status().await.sending, 7);
    }

    #[tokio::test]
    async fn expired_leases_are_reclaimed() {
        let store = Arc::new(InMemoryQueueStore::new());
        let tasks = seed(&store, 2).await;
        let clock = FixedClock::new(start());
        let lp = poll_loop(store.clone(), clock.clone(), 5);

        lp.run_cycle().await.unwrap();
        clock.advance(chrono::Duration::seconds(121));
        let report = lp.run_cycle().await.unwrap();

        assert_eq!(report.candidates, 0);
        assert_eq!(report.reclaimed, 2);
        for task in &tasks {
            let doc = store.peek(task.id).await.unwrap();
            assert_eq!(doc.retry_count, 1);
            assert_eq!(doc.lease_expires_at, Some(clock.now() + chrono::Duration::seconds(120)));
        }
    }

    #[tokio::test]
    async fn store_outage_fails_the_cycle() {
        let store = Arc::new(InMemoryQueueStore::new());
        seed(&store, 1).await;
        let lp = poll_loop(store.clone(), FixedClock::new(start()), 5);
        store.set_unavailable(Some("offline")).await;

        let err = lp.run_cycle().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }

    #[tokio::test]
    async fn contended_candidate_is_skipped() {
        let store = Arc::new(InMemoryQueueStore::new());
        let tasks = seed(&store, 2).await;
        store.inject_conflicts(tasks[0].id, 10).await;
        let lp = poll_loop(store.clone(), FixedClock::new(start()), 5);

        let report = lp.run_cycle().await.unwrap();

        assert_eq!(report.contended, 1);
        assert_eq!(report.leased, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_notification_triggers_a_cycle() {
        let store = Arc::new(InMemoryQueueStore::new());
        let lp = poll_loop(store.clone(), FixedClock::new(start()), 5);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let trigger = crate::impls::ManualTrigger::new();
        let handle = tokio::spawn(lp.run(Box::new(trigger), shutdown_rx));

        let tasks = seed(&store, 1).await;
        for _ in 0..50 {
            if store.peek(tasks[0].id).await.unwrap().status == TaskStatus::Sending {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.peek(tasks[0].id).await.unwrap().status, TaskStatus::Sending);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
