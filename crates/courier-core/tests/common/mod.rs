#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use ulid::Ulid;

use courier_core::app::{
    Dispatcher, InFlight, LeaseManager, LeaseSettings, OutcomeHandler, PollLoop, PollSettings,
    WorkerStats,
};
use courier_core::domain::{
    AccountId, LeaseClaim, RetryPolicy, TaskDocument, TaskId, WorkerId, WorkerIdentity,
};
use courier_core::impls::{Behaviour, InMemoryQueueStore, SimulatedTransport, SlotSelector};
use courier_core::ports::{Clock, FixedClock, ReportReceiver, Transport, report_channel};

pub const LEASE_TTL_SECS: i64 = 120;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub fn identity(account: &str) -> WorkerIdentity {
    WorkerIdentity::new(WorkerId::from_ulid(Ulid::new()), AccountId::new(account))
}

/// The lease `task` currently carries.
pub fn claim(task: &TaskDocument) -> LeaseClaim {
    LeaseClaim::of(task).expect("task is leased")
}

/// Everything one worker needs, wired against a shared store and clock.
pub struct TestWorker {
    pub identity: WorkerIdentity,
    pub leases: Arc<LeaseManager>,
    pub handler: Arc<OutcomeHandler>,
    pub in_flight: InFlight,
    pub transport: Arc<SimulatedTransport>,
    pub reports: Option<ReportReceiver>,
    pub stats: Arc<WorkerStats>,
}

pub struct Harness {
    pub store: Arc<InMemoryQueueStore>,
    pub clock: FixedClock,
    pub policy: RetryPolicy,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            store: Arc::new(InMemoryQueueStore::new()),
            clock: FixedClock::new(start()),
            policy,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    pub fn lease_settings(&self) -> LeaseSettings {
        LeaseSettings {
            ttl: Duration::seconds(LEASE_TTL_SECS),
            policy: self.policy,
            max_transaction_attempts: 5,
        }
    }

    pub fn lease_manager(&self) -> LeaseManager {
        LeaseManager::new(self.store.clone(), self.lease_settings())
    }

    pub fn worker(&self, account: &str, behaviour: Behaviour) -> TestWorker {
        let (tx, rx) = report_channel();
        let stats = Arc::new(WorkerStats::new());
        TestWorker {
            identity: identity(account),
            leases: Arc::new(self.lease_manager()),
            handler: Arc::new(OutcomeHandler::new(
                self.store.clone(),
                self.clock(),
                self.policy,
                0.20,
                5,
                stats.clone(),
            )),
            in_flight: InFlight::new(),
            transport: Arc::new(SimulatedTransport::new(0, tx, behaviour)),
            reports: Some(rx),
            stats,
        }
    }

    pub fn dispatcher(&self, worker: &TestWorker) -> Dispatcher {
        Dispatcher::new(
            Arc::new(SlotSelector::single(
                worker.transport.clone() as Arc<dyn Transport>
            )),
            worker.in_flight.clone(),
            worker.handler.clone(),
            160,
            worker.stats.clone(),
        )
    }

    pub fn poll_loop(&self, worker: &TestWorker) -> PollLoop {
        PollLoop::new(
            worker.identity.clone(),
            self.store.clone(),
            self.lease_manager(),
            self.dispatcher(worker),
            self.clock(),
            PollSettings {
                batch_size: 10,
                expiry_scan_window: 20,
                max_leases_per_cycle: 5,
                keepalive: std::time::Duration::from_secs(300),
                store_retry_delay: std::time::Duration::from_secs(30),
            },
            worker.stats.clone(),
        )
    }

    /// Insert a pending task created `age_minutes` before the harness start.
    pub async fn pending(&self, retry_count: u32, age_minutes: i64) -> TaskDocument {
        let mut task = TaskDocument::new_pending(
            TaskId::from_ulid(Ulid::new()),
            "+15551234567",
            "your code is 1234",
            start() - Duration::minutes(age_minutes),
        );
        task.retry_count = retry_count;
        self.store.insert(task.clone()).await;
        task
    }

    /// Insert a task already leased by `holder`, expiring at `expires_at`.
    pub async fn leased(
        &self,
        holder: WorkerId,
        retry_count: u32,
        expires_at: DateTime<Utc>,
    ) -> TaskDocument {
        let mut task = TaskDocument::new_pending(
            TaskId::from_ulid(Ulid::new()),
            "+15551234567",
            "your code is 1234",
            start() - Duration::minutes(30),
        );
        task.retry_count = retry_count;
        task.acquire_lease(
            holder,
            expires_at - Duration::seconds(LEASE_TTL_SECS),
            Duration::seconds(LEASE_TTL_SECS),
        );
        self.store.insert(task.clone()).await;
        task
    }
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
