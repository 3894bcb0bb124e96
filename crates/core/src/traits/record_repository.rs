use async_trait::async_trait;

use crate::models::WorkerRecord;
use crate::FleetResult;

/// Worker记录仓储（外部应用拥有的持久化配置的边界）
#[async_trait]
pub trait WorkerRecordRepository: Send + Sync {
    async fn get(&self, identity: &str) -> FleetResult<Option<WorkerRecord>>;

    /// 插入或整体替换
    async fn upsert(&self, record: &WorkerRecord) -> FleetResult<()>;

    async fn list(&self) -> FleetResult<Vec<WorkerRecord>>;
}
