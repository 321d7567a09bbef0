//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **WorkerBuilder**: ワーカーの構築とワイヤリング
//! - **LeaseManager**: トランザクションによる排他リース（期限切れの回収を含む）
//! - **Dispatcher**: リース済みタスクを Transport に渡す
//! - **ResultListener**: 非同期の送信結果を集約
//! - **OutcomeHandler**: 成功・失敗の最終状態を書き込む
//! - **PollLoop**: トリガー / watch 通知ごとにサイクルを回す
//! - **Worker**: 上記をまとめて起動・停止

pub mod builder;
pub mod dispatcher;
pub mod lease_manager;
pub mod outcome_handler;
pub mod poll_loop;
pub mod result_listener;
pub mod status;
pub mod worker;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, WorkerBuilder};
pub use self::dispatcher::{Dispatch, Dispatcher, ValidationError};
pub use self::lease_manager::{LeaseManager, LeaseSettings, decide_lease};
pub use self::outcome_handler::{Finalized, OutcomeHandler, decide_failure};
pub use self::poll_loop::{CycleReport, PollLoop, PollSettings};
pub use self::result_listener::{InFlight, ResultListener};
pub use self::status::{StatsSnapshot, StatusCounts, WorkerStats};
pub use self::worker::{Worker, WorkerHandle};
