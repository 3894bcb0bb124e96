use std::sync::Arc;

use async_trait::async_trait;
use botfleet_core::models::{RuntimeInfo, UnitSpec};
use botfleet_core::FleetResult;
use botfleet_worker::WorkerHost;

/// 运行单元后端
///
/// 后端只负责“单元”本身的创建、观测和销毁；名称和端口由
/// [`RuntimeProvisioner`](super::RuntimeProvisioner) 决定。
#[async_trait]
pub trait UnitBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    /// 按名称查找单元（包括已停止但未删除的单元）
    async fn inspect(&self, name: &str) -> FleetResult<Option<RuntimeInfo>>;

    /// 创建并启动单元；返回时单元已存在（状态注册是异步的）
    async fn launch(&self, spec: &UnitSpec) -> FleetResult<()>;

    async fn stop(&self, name: &str) -> FleetResult<()>;

    /// 强制删除单元，单元不存在时不是错误
    async fn remove(&self, name: &str) -> FleetResult<()>;

    /// 名称以 `prefix` 开头的全部单元
    async fn list(&self, prefix: &str) -> FleetResult<Vec<RuntimeInfo>>;

    /// 进程内单元直接返回Worker宿主；进程外单元返回 `None`，由调用方建立代理
    fn attach(&self, name: &str) -> Option<Arc<WorkerHost>>;
}
