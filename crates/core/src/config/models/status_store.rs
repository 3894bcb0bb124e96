use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusStoreKind {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusStoreConfig {
    pub backend: StatusStoreKind,
    pub url: String,
    pub max_retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for StatusStoreConfig {
    fn default() -> Self {
        Self {
            backend: StatusStoreKind::Redis,
            url: "redis://127.0.0.1:6379/0".to_string(),
            max_retry_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl StatusStoreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == StatusStoreKind::Redis {
            if self.url.is_empty() {
                return Err(anyhow::anyhow!("状态存储URL不能为空"));
            }
            if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
                return Err(anyhow::anyhow!("状态存储URL格式无效: {}", self.url));
            }
        }
        if self.max_retry_attempts == 0 {
            return Err(anyhow::anyhow!("最大重试次数必须大于0"));
        }
        Ok(())
    }
}
