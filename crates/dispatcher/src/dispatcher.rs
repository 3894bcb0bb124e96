use std::sync::Arc;

use botfleet_core::models::{redact_identity, DispatchOutcome, StatusRecord};
use botfleet_core::{FleetResult, StatusStore, WorkerRecordRepository};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::registry::{WorkerHandle, WorkerRegistry};

/// 同步事件分发器
///
/// `dispatch` 阻塞调用线程直到目标Worker处理完这一个事件，
/// 因此只能在异步运行时之外调用（例如 `spawn_blocking` 中）。
/// 分发不获取生命周期锁，也从不在请求路径上创建运行单元。
pub struct EventDispatcher {
    records: Arc<dyn WorkerRecordRepository>,
    store: Arc<dyn StatusStore>,
    registry: Arc<WorkerRegistry>,
    runtime: Handle,
    stats_refresh: bool,
}

impl EventDispatcher {
    pub fn new(
        records: Arc<dyn WorkerRecordRepository>,
        store: Arc<dyn StatusStore>,
        registry: Arc<WorkerRegistry>,
        runtime: Handle,
    ) -> Self {
        Self {
            records,
            store,
            registry,
            runtime,
            stats_refresh: true,
        }
    }

    pub fn with_stats_refresh(mut self, enabled: bool) -> Self {
        self.stats_refresh = enabled;
        self
    }

    pub fn dispatch(&self, identity: &str, event: Value) -> DispatchOutcome {
        let outcome = self.route(identity, event);
        metrics::counter!("botfleet_dispatch_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    fn route(&self, identity: &str, event: Value) -> DispatchOutcome {
        let who = redact_identity(identity);

        let status = match self.current_status(identity) {
            Ok(Some(status)) => status,
            Ok(None) => return DispatchOutcome::UnknownWorker,
            Err(e) => {
                warn!(identity = %who, "Status lookup failed: {}", e);
                return DispatchOutcome::WorkerUnavailable {
                    reason: format!("status unavailable: {e}"),
                };
            }
        };
        if !status.status.is_running() {
            debug!(identity = %who, status = %status.status, "Worker not running");
            return DispatchOutcome::WorkerUnavailable {
                reason: format!("worker is {}", status.status),
            };
        }

        let Some(handle) = self.registry.get(identity) else {
            debug!(identity = %who, "Worker running but no handle registered here");
            return DispatchOutcome::WorkerUnavailable {
                reason: "worker has no live handle in this process".to_string(),
            };
        };

        match handle.host().handle_event_blocking(event) {
            Ok(outcome) => {
                if self.stats_refresh {
                    self.refresh_stats(handle);
                }
                DispatchOutcome::Delivered(outcome)
            }
            Err(e) => {
                error!(identity = %who, unit = %handle.unit_name, "Event processing failed: {}", e);
                DispatchOutcome::ProcessingError {
                    message: e.to_string(),
                }
            }
        }
    }

    /// 共享存储中的状态；没有状态记录但有Worker记录时视为从未启动
    fn current_status(&self, identity: &str) -> FleetResult<Option<StatusRecord>> {
        if let Some(status) = self.runtime.block_on(self.store.get_status(identity))? {
            return Ok(Some(status));
        }
        Ok(self
            .runtime
            .block_on(self.records.get(identity))?
            .map(|record| StatusRecord {
                status: record.status,
                ..Default::default()
            }))
    }

    fn refresh_stats(&self, handle: Arc<WorkerHandle>) {
        let store = self.store.clone();
        self.runtime.spawn(async move {
            let who = redact_identity(&handle.identity);
            match handle.host().stats().await {
                Ok(stats) => {
                    if let Err(e) = store.put_state(&handle.identity, &stats).await {
                        debug!(identity = %who, "Stats refresh not stored: {}", e);
                    }
                }
                Err(e) => debug!(identity = %who, "Stats refresh failed: {}", e),
            }
        });
    }
}
