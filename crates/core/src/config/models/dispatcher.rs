use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 事件处理成功后异步刷新统计信息
    pub stats_refresh_enabled: bool,
    pub reconcile_on_startup: bool,
    /// 周期性对账间隔，0表示关闭
    pub reconcile_interval_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            stats_refresh_enabled: true,
            reconcile_on_startup: true,
            reconcile_interval_seconds: 60,
        }
    }
}
