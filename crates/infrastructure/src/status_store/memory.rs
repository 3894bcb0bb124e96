use std::collections::HashMap;

use async_trait::async_trait;
use botfleet_core::models::{StatsMap, StatusRecord};
use botfleet_core::{FleetResult, StatusStore};
use tokio::sync::RwLock;

/// 进程内状态存储
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    statuses: RwLock<HashMap<String, StatusRecord>>,
    states: RwLock<HashMap<String, StatsMap>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn status_count(&self) -> usize {
        self.statuses.read().await.len()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn get_status(&self, identity: &str) -> FleetResult<Option<StatusRecord>> {
        Ok(self.statuses.read().await.get(identity).cloned())
    }

    async fn put_status(&self, identity: &str, record: &StatusRecord) -> FleetResult<()> {
        let mut stored = record.clone();
        if stored.last_update.is_none() {
            stored.last_update = Some(chrono::Utc::now());
        }
        self.statuses
            .write()
            .await
            .insert(identity.to_string(), stored);
        Ok(())
    }

    async fn delete_status(&self, identity: &str) -> FleetResult<()> {
        self.statuses.write().await.remove(identity);
        self.states.write().await.remove(identity);
        Ok(())
    }

    async fn get_state(&self, identity: &str) -> FleetResult<Option<StatsMap>> {
        Ok(self.states.read().await.get(identity).cloned())
    }

    async fn put_state(&self, identity: &str, state: &StatsMap) -> FleetResult<()> {
        self.states
            .write()
            .await
            .insert(identity.to_string(), state.clone());
        Ok(())
    }

    async fn ping(&self) -> FleetResult<()> {
        Ok(())
    }
}
