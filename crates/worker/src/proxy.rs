use std::time::Duration;

use async_trait::async_trait;
use botfleet_core::models::{EventOutcome, StatsMap, WorkerConfig};
use botfleet_core::{FleetError, FleetResult, WorkerRuntime};
use serde_json::Value;
use tracing::{debug, info, warn};

/// 运行单元的HTTP接口路径
pub const EVENTS_PATH: &str = "/events";
pub const STATS_PATH: &str = "/stats";
pub const HEALTH_PATH: &str = "/health";

/// 转发到独立运行单元的Worker代理
///
/// 真正的Worker运行在运行单元内，代理只负责把事件和统计请求转发过去。
/// 运行单元的启停由运行单元管理器负责，因此 `stop` 只断开代理。
pub struct ProxyWorker {
    name: String,
    base_url: String,
    client: reqwest::Client,
    startup_attempts: u32,
    retry_delay: Duration,
    connected: bool,
}

impl ProxyWorker {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            startup_attempts: 30,
            retry_delay: Duration::from_millis(200),
            connected: false,
        }
    }

    pub fn with_startup_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.startup_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn probe(&self) -> FleetResult<()> {
        let response = self
            .client
            .get(self.url(HEALTH_PATH))
            .send()
            .await
            .map_err(|e| FleetError::Network(format!("运行单元 {} 无法连接: {e}", self.name)))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(FleetError::Network(format!(
                "运行单元 {} 健康检查失败: HTTP {}",
                self.name,
                response.status()
            )))
        }
    }
}

#[async_trait(?Send)]
impl WorkerRuntime for ProxyWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, _config: &WorkerConfig) -> FleetResult<()> {
        // 配置在运行单元启动时已通过环境变量传入
        Ok(())
    }

    async fn start(&mut self) -> FleetResult<()> {
        let mut last_error = None;
        for attempt in 1..=self.startup_attempts {
            match self.probe().await {
                Ok(()) => {
                    info!("Connected to unit {} at {}", self.name, self.base_url);
                    self.connected = true;
                    return Ok(());
                }
                Err(e) => {
                    debug!(
                        "Unit {} not ready (attempt {}/{}): {}",
                        self.name, attempt, self.startup_attempts, e
                    );
                    last_error = Some(e);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            FleetError::Network(format!("运行单元 {} 未就绪", self.name))
        }))
    }

    async fn stop(&mut self) -> FleetResult<()> {
        self.connected = false;
        Ok(())
    }

    async fn handle_event(&mut self, event: &Value) -> FleetResult<EventOutcome> {
        let response = self
            .client
            .post(self.url(EVENTS_PATH))
            .json(event)
            .send()
            .await
            .map_err(|e| FleetError::Network(format!("转发事件到 {} 失败: {e}", self.name)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<EventOutcome>()
                .await
                .map_err(|e| FleetError::Serialization(format!("解析事件结果失败: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        warn!("Unit {} failed to handle event: HTTP {} - {}", self.name, status, body);
        Err(FleetError::Processing(format!(
            "运行单元 {} 返回 HTTP {status}: {body}",
            self.name
        )))
    }

    async fn stats(&self) -> FleetResult<StatsMap> {
        let response = self
            .client
            .get(self.url(STATS_PATH))
            .send()
            .await
            .map_err(|e| FleetError::Network(format!("读取 {} 统计信息失败: {e}", self.name)))?;
        if !response.status().is_success() {
            return Err(FleetError::Network(format!(
                "读取 {} 统计信息失败: HTTP {}",
                self.name,
                response.status()
            )));
        }
        let mut stats = response
            .json::<StatsMap>()
            .await
            .map_err(|e| FleetError::Serialization(format!("解析统计信息失败: {e}")))?;
        stats.insert("connected".to_string(), Value::Bool(self.connected));
        Ok(stats)
    }
}
