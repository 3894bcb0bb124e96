use serde::{Deserialize, Serialize};

use crate::models::{WorkerConfig, WorkerType};

/// 启动时写入记录仓储的Worker（外部前端缺席时的最小注册方式）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSeedConfig {
    pub identity: String,
    pub worker_type: WorkerType,
    #[serde(default)]
    pub config: WorkerConfig,
    #[serde(default)]
    pub autostart: bool,
}
