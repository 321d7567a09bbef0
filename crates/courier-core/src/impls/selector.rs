//! SlotSelector - スロット番号で Transport を選ぶ

use std::sync::Arc;

use crate::ports::{Transport, TransportSelector};

/// 端末の SIM スロット一覧
pub struct SlotSelector {
    transports: Vec<Arc<dyn Transport>>,
}

impl SlotSelector {
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        Self { transports }
    }

    pub fn single(transport: Arc<dyn Transport>) -> Self {
        Self::new(vec![transport])
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

impl TransportSelector for SlotSelector {
    fn select(&self, preferred: Option<usize>) -> Option<Arc<dyn Transport>> {
        let preferred = preferred.and_then(|slot| {
            self.transports
                .iter()
                .find(|t| t.slot() == slot && t.is_active())
        });
        preferred
            .or_else(|| self.transports.iter().find(|t| t.is_active()))
            .cloned()
    }
}
