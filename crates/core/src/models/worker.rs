use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{StatusRecord, WorkerStatus};
use crate::errors::{FleetError, FleetResult};

/// Worker的自由格式配置
pub type WorkerConfig = serde_json::Map<String, serde_json::Value>;

/// Worker声明类型（封闭枚举，未知类型在解析时即被拒绝）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    Echo,
    Numbers,
}

impl WorkerType {
    pub const ALL: [WorkerType; 2] = [WorkerType::Echo, WorkerType::Numbers];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerType::Echo => "echo",
            WorkerType::Numbers => "numbers",
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerType {
    type Err = FleetError;

    fn from_str(s: &str) -> FleetResult<Self> {
        WorkerType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| FleetError::UnknownWorkerType(s.to_string()))
    }
}

/// 凭据字符串只在日志中显示末尾8个字符
pub fn redact_identity(identity: &str) -> String {
    let count = identity.chars().count();
    if count <= 8 {
        return identity.to_string();
    }
    let tail: String = identity.chars().skip(count - 8).collect();
    format!("…{tail}")
}

/// Worker记录（由外部应用持久化，编排核心读取并回写生命周期字段）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub identity: String,
    pub worker_type: WorkerType,
    pub config: WorkerConfig,
    pub status: WorkerStatus,
    pub error_message: Option<String>,
    pub webhook_url: Option<String>,
    pub unit_name: Option<String>,
    pub port: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl WorkerRecord {
    pub fn new(identity: impl Into<String>, worker_type: WorkerType, config: WorkerConfig) -> Self {
        Self {
            identity: identity.into(),
            worker_type,
            config,
            status: WorkerStatus::Stopped,
            error_message: None,
            webhook_url: None,
            unit_name: None,
            port: None,
            created_at: Utc::now(),
            last_activity: None,
        }
    }

    pub fn clear_unit(&mut self) {
        self.webhook_url = None;
        self.unit_name = None;
        self.port = None;
    }

    /// 用共享存储中的权威状态覆盖本地缓存字段
    pub fn apply_status_record(&mut self, record: &StatusRecord) {
        self.status = record.status;
        self.error_message = record.error_text().map(str::to_string);
        self.webhook_url = non_empty(&record.webhook_url);
        self.unit_name = non_empty(&record.name);
        self.port = record.port;
        if let Some(updated) = record.last_update {
            self.last_activity = Some(updated);
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
