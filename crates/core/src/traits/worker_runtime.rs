//! Worker运行时契约
//!
//! 每个Worker（进程内实例或转发到运行单元的代理）都必须实现此契约。
//! 实现运行在各自Worker专属的单线程协作式调度器上，因此不要求 `Send`。

use async_trait::async_trait;

use crate::models::{EventOutcome, StatsMap, WorkerConfig};
use crate::FleetResult;

#[async_trait(?Send)]
pub trait WorkerRuntime {
    /// Worker名称
    fn name(&self) -> &str;

    /// 只做内部状态初始化（注册命令和处理器），不产生外部副作用
    fn initialize(&mut self, config: &WorkerConfig) -> FleetResult<()>;

    /// 声明自己已可以接收事件；在 `stop` 之后必须可以再次调用
    async fn start(&mut self) -> FleetResult<()>;

    async fn stop(&mut self) -> FleetResult<()>;

    /// 处理单个事件
    ///
    /// 输入格式错误必须转换为 `EventOutcome::rejected`，
    /// 只有Worker内部故障才返回 `Err`。
    async fn handle_event(&mut self, event: &serde_json::Value) -> FleetResult<EventOutcome>;

    async fn stats(&self) -> FleetResult<StatsMap>;
}
