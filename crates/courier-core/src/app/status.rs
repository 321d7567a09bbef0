//! Status - ワーカーの稼働状況とキューの集計

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::TaskStatus;

/// Task counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub sending: usize,
    pub sent: usize,
    pub failed: usize,
    pub permanently_failed: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Sending => self.sending += 1,
            TaskStatus::Sent => self.sent += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::PermanentlyFailed => self.permanently_failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.sending + self.sent + self.failed + self.permanently_failed
    }
}

/// ワーカー1台分のカウンタ（複数タスクから共有される）
#[derive(Debug, Default)]
pub struct WorkerStats {
    cycles: AtomicU64,
    leased: AtomicU64,
    dispatched: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    quarantined: AtomicU64,
    deleted: AtomicU64,
    skipped: AtomicU64,
    store_errors: AtomicU64,
}

/// `WorkerStats` のある時点の値
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub leased: u64,
    pub dispatched: u64,
    pub delivered: u64,
    pub failed: u64,
    pub quarantined: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub store_errors: u64,
}

impl StatsSnapshot {
    /// 複数ワーカーの合計
    pub fn merge(mut self, other: &StatsSnapshot) -> Self {
        self.cycles += other.cycles;
        self.leased += other.leased;
        self.dispatched += other.dispatched;
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.quarantined += other.quarantined;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.store_errors += other.store_errors;
        self
    }
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn leased(&self) {
        self.leased.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn quarantined(&self) {
        self.quarantined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            leased: self.leased.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            quarantined: self.quarantined.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}
