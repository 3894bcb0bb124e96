use std::collections::BTreeMap;

use async_trait::async_trait;
use botfleet_core::config::WorkerSeedConfig;
use botfleet_core::models::WorkerRecord;
use botfleet_core::{FleetResult, WorkerRecordRepository};
use tokio::sync::RwLock;

/// 进程内Worker记录仓储
///
/// 外部应用拥有真正的持久化；控制进程启动时用配置中的 `[[workers]]` 填充。
#[derive(Debug, Default)]
pub struct InMemoryWorkerRecordRepository {
    records: RwLock<BTreeMap<String, WorkerRecord>>,
}

impl InMemoryWorkerRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seeds(seeds: &[WorkerSeedConfig]) -> Self {
        let records = seeds
            .iter()
            .map(|seed| {
                let record =
                    WorkerRecord::new(seed.identity.clone(), seed.worker_type, seed.config.clone());
                (seed.identity.clone(), record)
            })
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl WorkerRecordRepository for InMemoryWorkerRecordRepository {
    async fn get(&self, identity: &str) -> FleetResult<Option<WorkerRecord>> {
        Ok(self.records.read().await.get(identity).cloned())
    }

    async fn upsert(&self, record: &WorkerRecord) -> FleetResult<()> {
        self.records
            .write()
            .await
            .insert(record.identity.clone(), record.clone());
        Ok(())
    }

    async fn list(&self) -> FleetResult<Vec<WorkerRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
