use alarmflow_common::strategy::Strategy;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::Result;

/// Read-only view of the relational strategy/item/action-config store.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    async fn get_strategy(&self, id: i64) -> Result<Option<Strategy>>;

    /// Batch lookup; missing ids are simply absent from the map.
    async fn get_strategies(&self, ids: &[i64]) -> Result<HashMap<i64, Strategy>> {
        let mut found = HashMap::new();
        for id in ids {
            if let Some(strategy) = self.get_strategy(*id).await? {
                found.insert(*id, strategy);
            }
        }
        Ok(found)
    }
}

/// In-process [`StrategyStore`] seeded by tests or a replay file.
#[derive(Default)]
pub struct MemoryStrategyStore {
    strategies: RwLock<HashMap<i64, Strategy>>,
}

impl MemoryStrategyStore {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self {
            strategies: RwLock::new(strategies.into_iter().map(|s| (s.id, s)).collect()),
        }
    }

    pub async fn upsert(&self, strategy: Strategy) {
        self.strategies.write().await.insert(strategy.id, strategy);
    }

    pub async fn remove(&self, id: i64) -> bool {
        self.strategies.write().await.remove(&id).is_some()
    }
}

#[async_trait]
impl StrategyStore for MemoryStrategyStore {
    async fn get_strategy(&self, id: i64) -> Result<Option<Strategy>> {
        Ok(self.strategies.read().await.get(&id).cloned())
    }
}
