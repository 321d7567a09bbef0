//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（リモートのドキュメントストア、SMS 送信、
//! スケジューラ）へのインターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - QueueStore が source of truth（正本）
//! - Transport は fire-and-forget、結果はチャネル経由で非同期に届く
//! - 時刻と ID は差し替え可能（テストで決定的にするため）

pub mod clock;
pub mod id_generator;
pub mod task_store;
pub mod transport;
pub mod trigger;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{QueueStore, Snapshot, StoreError, TaskQuery, WriteSet, transact};
pub use self::transport::{
    ReportReceiver, ReportSender, SendRequest, Transport, TransportError, TransportReport,
    TransportSelector, report_channel,
};
pub use self::trigger::TriggerSource;
