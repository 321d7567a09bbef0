//! courier-core
//!
//! Core building blocks for the Courier delivery workers: many independent
//! workers compete for outbound messages in a shared remote queue, lease each
//! one exclusively, hand it to a transport, and record the outcome.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task document, status, outcome, lease outcome, retry decision, errors）
//! - **ports**: 抽象化レイヤー（QueueStore, Transport, TransportSelector, Clock, IdGenerator, TriggerSource）
//! - **app**: アプリケーションロジック（lease manager, dispatcher, outcome handler, result listener, poll loop, builder）
//! - **impls**: 実装（InMemoryQueueStore, SimulatedTransport など開発用）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{WorkerBuilder, WorkerHandle};
pub use config::{WorkerConfig, load_config};
pub use domain::{CourierError, ErrorKind};
