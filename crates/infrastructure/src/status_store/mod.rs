//! # 共享状态存储
//!
//! 控制进程与运行单元通过同一个状态存储交换生命周期状态。
//!
//! ```text
//! worker:{identity}        HASH  status / error / webhook_url / name / port / last_update
//! worker_state:{identity}  STRING  Worker统计信息（JSON）
//! ```
//!
//! 生产环境使用 [`RedisStatusStore`]；[`InMemoryStatusStore`] 供测试和
//! 进程内运行单元的单机部署使用。

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryStatusStore;
pub use redis_store::RedisStatusStore;

use std::sync::Arc;

use botfleet_core::config::{StatusStoreConfig, StatusStoreKind};
use botfleet_core::{FleetResult, StatusStore};
use tracing::info;

pub struct StatusStoreFactory;

impl StatusStoreFactory {
    pub async fn create(config: &StatusStoreConfig) -> FleetResult<Arc<dyn StatusStore>> {
        match config.backend {
            StatusStoreKind::Redis => {
                info!("Initializing Redis status store");
                let store = RedisStatusStore::connect(config).await?;
                Ok(Arc::new(store))
            }
            StatusStoreKind::Memory => {
                info!("Initializing in-memory status store");
                Ok(Arc::new(InMemoryStatusStore::new()))
            }
        }
    }
}
