//! TriggerSource の実装
//!
//! - **IntervalTrigger**: 一定間隔（本番用）
//! - **ManualTrigger**: `fire()` で発火（テスト・CLI 用）

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::ports::TriggerSource;

/// 一定間隔で発火する（最初の発火は1周期後）
pub struct IntervalTrigger {
    interval: Interval,
}

impl IntervalTrigger {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl TriggerSource for IntervalTrigger {
    async fn next_tick(&mut self) {
        self.interval.tick().await;
    }
}

/// 手動トリガー（clone したハンドルから発火できる）
#[derive(Clone, Default)]
pub struct ManualTrigger {
    notify: Arc<Notify>,
}

impl ManualTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 次の `next_tick` を起こす（待っていなければ1回分保持される）
    pub fn fire(&self) {
        self.notify.notify_one();
    }
}

#[async_trait]
impl TriggerSource for ManualTrigger {
    async fn next_tick(&mut self) {
        self.notify.notified().await;
    }
}
