use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::worker::{WorkerConfig, WorkerType};
use crate::errors::{FleetError, FleetResult};

pub const ENV_IDENTITY: &str = "BOTFLEET_IDENTITY";
pub const ENV_WORKER_TYPE: &str = "BOTFLEET_WORKER_TYPE";
pub const ENV_CALLBACK_HOST: &str = "BOTFLEET_CALLBACK_HOST";
pub const ENV_PORT: &str = "BOTFLEET_PORT";
pub const ENV_UNIT_NAME: &str = "BOTFLEET_UNIT_NAME";
pub const ENV_STATUS_URL: &str = "BOTFLEET_STATUS_URL";
pub const ENV_WORKER_CONFIG: &str = "BOTFLEET_WORKER_CONFIG";

/// 根据凭据末尾8个字符生成运行单元名称
pub fn unit_name(prefix: &str, identity: &str) -> String {
    let count = identity.chars().count();
    let tail: String = identity.chars().skip(count.saturating_sub(8)).collect();
    format!("{prefix}{tail}")
}

/// Webhook回调地址
pub fn callback_url(callback_host: &str, identity: &str) -> String {
    format!("https://{callback_host}/workers/webhook/{identity}")
}

/// 启动运行单元所需的全部参数
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSpec {
    pub identity: String,
    pub worker_type: WorkerType,
    pub config: WorkerConfig,
    pub name: String,
    pub port: u16,
    pub callback_host: String,
    pub status_url: String,
}

impl UnitSpec {
    pub fn callback_url(&self) -> String {
        callback_url(&self.callback_host, &self.identity)
    }

    /// 传递给运行单元的环境变量
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            (ENV_IDENTITY.to_string(), self.identity.clone()),
            (ENV_WORKER_TYPE.to_string(), self.worker_type.to_string()),
            (ENV_CALLBACK_HOST.to_string(), self.callback_host.clone()),
            (ENV_PORT.to_string(), self.port.to_string()),
            (ENV_UNIT_NAME.to_string(), self.name.clone()),
            (ENV_STATUS_URL.to_string(), self.status_url.clone()),
            (
                ENV_WORKER_CONFIG.to_string(),
                serde_json::Value::Object(self.config.clone()).to_string(),
            ),
        ]
    }

    /// 从环境变量读取（运行单元一侧）
    pub fn from_lookup<F>(lookup: F) -> FleetResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| FleetError::Configuration(format!("缺少环境变量: {key}")))
        };

        let port = required(ENV_PORT)?;
        let port = port
            .parse::<u16>()
            .map_err(|e| FleetError::Configuration(format!("无效的端口 '{port}': {e}")))?;
        let config = match lookup(ENV_WORKER_CONFIG).filter(|v| !v.trim().is_empty()) {
            Some(raw) => match serde_json::from_str::<serde_json::Value>(&raw)? {
                serde_json::Value::Object(map) => map,
                _ => {
                    return Err(FleetError::Configuration(format!(
                        "{ENV_WORKER_CONFIG} 必须是JSON对象"
                    )))
                }
            },
            None => WorkerConfig::new(),
        };

        Ok(Self {
            identity: required(ENV_IDENTITY)?,
            worker_type: required(ENV_WORKER_TYPE)?.parse()?,
            config,
            name: required(ENV_UNIT_NAME)?,
            port,
            callback_host: required(ENV_CALLBACK_HOST)?,
            status_url: lookup(ENV_STATUS_URL).unwrap_or_default(),
        })
    }

    pub fn from_env() -> FleetResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// provision 的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedUnit {
    pub identity: String,
    pub name: String,
    pub port: u16,
    pub callback_url: String,
    /// 已存在且处于活动状态的单元被直接复用
    pub reused: bool,
}

/// 运行单元的观测信息（不依赖状态存储）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub name: String,
    pub active: bool,
    pub state: String,
    pub port: Option<u16>,
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn spec() -> UnitSpec {
        let mut config = WorkerConfig::new();
        config.insert("admin_ids".to_string(), serde_json::json!([42]));
        UnitSpec {
            identity: "123456:ABCDEFGHIJKL".to_string(),
            worker_type: WorkerType::Numbers,
            config,
            name: unit_name("bot_", "123456:ABCDEFGHIJKL"),
            port: 8444,
            callback_host: "fleet.example.com".to_string(),
            status_url: "redis://127.0.0.1:6379/0".to_string(),
        }
    }

    #[test]
    fn test_unit_name_uses_last_eight_chars() {
        assert_eq!(unit_name("bot_", "123456:ABCDEFGHIJKL"), "bot_EFGHIJKL");
        assert_eq!(unit_name("bot_", "tok-A"), "bot_tok-A");
    }

    #[test]
    fn test_env_contract_is_readable_by_unit() {
        let spec = spec();
        let env: HashMap<String, String> = spec.env().into_iter().collect();
        let parsed = UnitSpec::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(parsed, spec);
        assert_eq!(
            parsed.callback_url(),
            "https://fleet.example.com/workers/webhook/123456:ABCDEFGHIJKL"
        );
    }

    #[test]
    fn test_missing_env_is_configuration_error() {
        let err = UnitSpec::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, FleetError::Configuration(_)));
    }

    #[test]
    fn test_config_must_be_object() {
        let mut env: HashMap<String, String> = spec().env().into_iter().collect();
        env.insert(ENV_WORKER_CONFIG.to_string(), "[1,2]".to_string());
        let err = UnitSpec::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, FleetError::Configuration(_)));
    }
}
