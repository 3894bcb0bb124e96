use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{FleetError, FleetResult};

/// Worker生命周期状态
///
/// `stopped → starting → running → stopping → stopped`，
/// `error` 可从 starting/running/stopping 进入。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    #[default]
    Unknown,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Unknown => "unknown",
            WorkerStatus::Starting => "starting",
            WorkerStatus::Running => "running",
            WorkerStatus::Stopping => "stopping",
            WorkerStatus::Stopped => "stopped",
            WorkerStatus::Error => "error",
        }
    }

    /// 判断状态转换是否合法
    pub fn can_transition_to(&self, next: WorkerStatus) -> bool {
        use WorkerStatus::*;
        matches!(
            (self, next),
            (Stopped | Error | Unknown, Starting)
                | (Starting, Running)
                | (Running | Error | Unknown, Stopping)
                | (Stopping, Stopped)
                | (Starting | Running | Stopping, Error)
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, WorkerStatus::Running)
    }

    /// 不会再自行变化的状态（运行单元已经给出结论）
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            WorkerStatus::Running | WorkerStatus::Stopped | WorkerStatus::Error
        )
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = FleetError;

    fn from_str(s: &str) -> FleetResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "unknown" | "" => Ok(WorkerStatus::Unknown),
            "starting" => Ok(WorkerStatus::Starting),
            "running" => Ok(WorkerStatus::Running),
            "stopping" => Ok(WorkerStatus::Stopping),
            "stopped" => Ok(WorkerStatus::Stopped),
            "error" => Ok(WorkerStatus::Error),
            other => Err(FleetError::Serialization(format!(
                "未知的Worker状态: {other}"
            ))),
        }
    }
}

/// 共享状态存储中的状态记录，键为 `worker:{identity}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusRecord {
    pub status: WorkerStatus,
    pub error: String,
    pub webhook_url: String,
    pub name: String,
    pub port: Option<u16>,
    pub last_update: Option<DateTime<Utc>>,
}

pub const FIELD_STATUS: &str = "status";
pub const FIELD_ERROR: &str = "error";
pub const FIELD_WEBHOOK_URL: &str = "webhook_url";
pub const FIELD_NAME: &str = "name";
pub const FIELD_PORT: &str = "port";
pub const FIELD_LAST_UPDATE: &str = "last_update";

impl StatusRecord {
    pub fn new(status: WorkerStatus) -> Self {
        Self {
            status,
            last_update: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    pub fn with_unit(mut self, name: impl Into<String>, port: u16) -> Self {
        self.name = name.into();
        self.port = Some(port);
        self
    }

    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = url.into();
        self
    }

    /// 轮询超时时返回的软失败记录
    pub fn timed_out() -> Self {
        Self::new(WorkerStatus::Unknown).with_error("Timeout waiting for status")
    }

    pub fn error_text(&self) -> Option<&str> {
        if self.error.is_empty() {
            None
        } else {
            Some(&self.error)
        }
    }

    /// 转换为哈希字段
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            (FIELD_STATUS.to_string(), self.status.to_string()),
            (FIELD_ERROR.to_string(), self.error.clone()),
            (FIELD_WEBHOOK_URL.to_string(), self.webhook_url.clone()),
            (FIELD_NAME.to_string(), self.name.clone()),
            (
                FIELD_PORT.to_string(),
                self.port.map(|p| p.to_string()).unwrap_or_default(),
            ),
        ];
        let last_update = self.last_update.unwrap_or_else(Utc::now);
        fields.push((FIELD_LAST_UPDATE.to_string(), last_update.to_rfc3339()));
        fields
    }

    /// 从哈希字段还原，缺失字段取默认值
    pub fn from_fields(fields: &HashMap<String, String>) -> FleetResult<Self> {
        let status = fields
            .get(FIELD_STATUS)
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or_default();
        let port = match fields.get(FIELD_PORT).map(|p| p.trim()) {
            Some(p) if !p.is_empty() => Some(p.parse::<u16>().map_err(|e| {
                FleetError::Serialization(format!("无效的端口字段 '{p}': {e}"))
            })?),
            _ => None,
        };
        let last_update = fields
            .get(FIELD_LAST_UPDATE)
            .filter(|s| !s.is_empty())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Self {
            status,
            error: fields.get(FIELD_ERROR).cloned().unwrap_or_default(),
            webhook_url: fields.get(FIELD_WEBHOOK_URL).cloned().unwrap_or_default(),
            name: fields.get(FIELD_NAME).cloned().unwrap_or_default(),
            port,
            last_update,
        })
    }
}
