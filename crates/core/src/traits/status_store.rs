use async_trait::async_trait;

use crate::models::{StatsMap, StatusRecord};
use crate::FleetResult;

/// 共享状态存储
///
/// 跨进程的权威状态来源。同一个identity的写入由生命周期控制器串行化，
/// 不同进程之间按键“最后写入者获胜”。
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// 读取 `worker:{identity}`，不存在时返回 `None`
    async fn get_status(&self, identity: &str) -> FleetResult<Option<StatusRecord>>;

    /// 整体写入 `worker:{identity}`
    async fn put_status(&self, identity: &str, record: &StatusRecord) -> FleetResult<()>;

    async fn delete_status(&self, identity: &str) -> FleetResult<()>;

    /// 读取 `worker_state:{identity}`
    async fn get_state(&self, identity: &str) -> FleetResult<Option<StatsMap>>;

    async fn put_state(&self, identity: &str, state: &StatsMap) -> FleetResult<()>;

    /// 连通性检查
    async fn ping(&self) -> FleetResult<()>;
}

pub fn status_key(identity: &str) -> String {
    format!("worker:{identity}")
}

pub fn state_key(identity: &str) -> String {
    format!("worker_state:{identity}")
}
