//! 运行单元入口（`botfleet unit`）
//!
//! ```text
//! env(BOTFLEET_*) → UnitSpec → starting → WorkerHost(initialize, start) → running
//!                                   │                                   │
//!                                   └──── 失败 ──→ error                ↓
//!                        POST /events, GET /stats, GET /health  ← 控制进程的ProxyWorker
//!                                                                       │
//!                                        SIGTERM → stopping → stop → stopped
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use botfleet_core::models::{redact_identity, StatusRecord, UnitSpec, WorkerStatus};
use botfleet_core::StatusStore;
use botfleet_infrastructure::{InMemoryStatusStore, RedisStatusStore};
use botfleet_worker::proxy::{EVENTS_PATH, HEALTH_PATH, STATS_PATH};
use botfleet_worker::WorkerHost;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

/// 按 `BOTFLEET_STATUS_URL` 连接共享状态存储
pub async fn open_store(status_url: &str) -> Result<Arc<dyn StatusStore>> {
    if status_url.is_empty() {
        warn!("No status store URL given, unit status is only kept in memory");
        return Ok(Arc::new(InMemoryStatusStore::new()));
    }
    let store = RedisStatusStore::connect_url(status_url)
        .await
        .context("连接状态存储失败")?;
    Ok(Arc::new(store))
}

fn internal_error(message: String) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
}

async fn receive_event(State(host): State<Arc<WorkerHost>>, Json(event): Json<Value>) -> Response {
    match host.handle_event(event).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => internal_error(e.to_string()),
    }
}

async fn report_stats(State(host): State<Arc<WorkerHost>>) -> Response {
    match host.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal_error(e.to_string()),
    }
}

async fn health(State(host): State<Arc<WorkerHost>>) -> Response {
    if host.is_alive() {
        Json(json!({"status": "ok", "unit": host.label()})).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "worker thread exited").into_response()
    }
}

pub fn unit_router(host: Arc<WorkerHost>) -> Router {
    Router::new()
        .route(EVENTS_PATH, post(receive_event))
        .route(STATS_PATH, get(report_stats))
        .route(HEALTH_PATH, get(health))
        .with_state(host)
}

/// 单个运行单元：一个Worker和它的HTTP接口
pub struct UnitProcess {
    spec: UnitSpec,
    store: Arc<dyn StatusStore>,
}

impl UnitProcess {
    pub fn new(spec: UnitSpec, store: Arc<dyn StatusStore>) -> Self {
        Self { spec, store }
    }

    async fn record(&self, record: StatusRecord) {
        let record = record.with_unit(&self.spec.name, self.spec.port);
        if let Err(e) = self.store.put_status(&self.spec.identity, &record).await {
            warn!(unit = %self.spec.name, "Failed to record unit status: {}", e);
        }
    }

    async fn bring_up(&self) -> Result<(Arc<WorkerHost>, TcpListener)> {
        let worker_type = self.spec.worker_type;
        let host = WorkerHost::spawn(self.spec.name.clone(), move || {
            botfleet_worker::instantiate(worker_type)
        })?;
        host.initialize(self.spec.config.clone()).await?;
        host.start().await?;

        let address = format!("0.0.0.0:{}", self.spec.port);
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(e) => {
                if let Err(stop_err) = host.stop().await {
                    warn!(unit = %self.spec.name, "Worker stop failed: {}", stop_err);
                }
                return Err(e).with_context(|| format!("绑定端口失败: {address}"));
            }
        };
        Ok((host, listener))
    }

    /// 运行到收到关闭信号为止
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let who = redact_identity(&self.spec.identity);
        info!(
            identity = %who,
            unit = %self.spec.name,
            port = self.spec.port,
            worker_type = %self.spec.worker_type,
            "Unit starting"
        );
        self.record(StatusRecord::new(WorkerStatus::Starting)).await;

        let (host, listener) = match self.bring_up().await {
            Ok(ready) => ready,
            Err(e) => {
                error!(identity = %who, "Unit failed to start: {:#}", e);
                self.record(StatusRecord::new(WorkerStatus::Error).with_error(format!("{e:#}")))
                    .await;
                return Err(e);
            }
        };

        self.record(
            StatusRecord::new(WorkerStatus::Running).with_webhook_url(self.spec.callback_url()),
        )
        .await;
        info!(identity = %who, unit = %self.spec.name, "Unit running");

        let served = axum::serve(listener, unit_router(host.clone()))
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await;

        self.record(StatusRecord::new(WorkerStatus::Stopping)).await;
        if let Err(e) = host.stop().await {
            warn!(identity = %who, "Worker stop failed: {}", e);
        }

        match served {
            Ok(()) => {
                self.record(StatusRecord::new(WorkerStatus::Stopped)).await;
                info!(identity = %who, unit = %self.spec.name, "Unit stopped");
                Ok(())
            }
            Err(e) => {
                self.record(StatusRecord::new(WorkerStatus::Error).with_error(e.to_string()))
                    .await;
                Err(e).context("运行单元HTTP服务异常退出")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use botfleet_core::models::{EventStatus, WorkerConfig, WorkerType};
    use botfleet_core::WorkerRuntime;
    use botfleet_worker::ProxyWorker;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn spec(port: u16) -> UnitSpec {
        let mut config = WorkerConfig::new();
        config.insert("prefix".to_string(), json!("unit: "));
        UnitSpec {
            identity: "123456:UNIT-TOKEN".to_string(),
            worker_type: WorkerType::Echo,
            config,
            name: "bot_IT-TOKEN".to_string(),
            port,
            callback_host: "bots.example.com".to_string(),
            status_url: String::new(),
        }
    }

    async fn wait_for(store: &InMemoryStatusStore, identity: &str, status: WorkerStatus) -> StatusRecord {
        for _ in 0..200 {
            if let Some(record) = store.get_status(identity).await.unwrap() {
                if record.status == status {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("unit never reached {status}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unit_registers_serves_and_stops() {
        let port = free_port();
        let store = Arc::new(InMemoryStatusStore::new());
        let (tx, rx) = broadcast::channel(1);
        let unit = UnitProcess::new(spec(port), store.clone());
        let task = tokio::spawn(unit.run(rx));

        let running = wait_for(&store, "123456:UNIT-TOKEN", WorkerStatus::Running).await;
        assert_eq!(
            running.webhook_url,
            "https://bots.example.com/workers/webhook/123456:UNIT-TOKEN"
        );
        assert_eq!(running.name, "bot_IT-TOKEN");
        assert_eq!(running.port, Some(port));

        let mut proxy = ProxyWorker::new("bot_IT-TOKEN", format!("http://127.0.0.1:{port}"))
            .with_startup_retries(20, Duration::from_millis(25));
        proxy.start().await.unwrap();
        let outcome = proxy
            .handle_event(&json!({"message": {"text": "hello", "from": {"id": 1}, "chat": {"id": 1}}}))
            .await
            .unwrap();
        assert_eq!(outcome.status, EventStatus::Handled);
        assert_eq!(outcome.replies, vec!["unit: hello".to_string()]);

        let stats = proxy.stats().await.unwrap();
        assert_eq!(stats["name"], "EchoBot");
        assert_eq!(stats["events_handled"], 1);

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        let stopped = store.get_status("123456:UNIT-TOKEN").await.unwrap().unwrap();
        assert_eq!(stopped.status, WorkerStatus::Stopped);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_port_conflict_records_error() {
        let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let store = Arc::new(InMemoryStatusStore::new());
        let (_tx, rx) = broadcast::channel(1);

        let result = UnitProcess::new(spec(port), store.clone()).run(rx).await;
        assert!(result.is_err());

        let record = store.get_status("123456:UNIT-TOKEN").await.unwrap().unwrap();
        assert_eq!(record.status, WorkerStatus::Error);
        assert!(record.error.contains("绑定端口失败"));
    }

    #[tokio::test]
    async fn test_empty_status_url_uses_memory_store() {
        let store = open_store("").await.unwrap();
        store.ping().await.unwrap();
    }
}
