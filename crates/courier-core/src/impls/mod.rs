//! Impls - ポートの実装（開発・テスト用）
//!
//! - **InMemoryQueueStore**: QueueStore（インメモリ、障害注入つき）
//! - **SimulatedTransport**: Transport（結果を擬似的に報告）
//! - **SlotSelector**: TransportSelector
//! - **IntervalTrigger / ManualTrigger**: TriggerSource

pub mod inmem_store;
pub mod selector;
pub mod sim_transport;
pub mod trigger;

pub use inmem_store::InMemoryQueueStore;
pub use selector::SlotSelector;
pub use sim_transport::{Behaviour, SimulatedTransport};
pub use trigger::{IntervalTrigger, ManualTrigger};
