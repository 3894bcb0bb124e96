use std::sync::Arc;
use std::time::Duration;

use botfleet_core::config::{AppConfig, DispatcherConfig, StatusStoreKind, WorkerSeedConfig};
use botfleet_core::models::redact_identity;
use botfleet_core::{FleetError, FleetResult, StatusStore, WorkerRecordRepository};
use botfleet_infrastructure::{
    create_backend, InMemoryWorkerRecordRepository, RuntimeProvisioner, StatusStoreFactory,
};
use futures::future::join_all;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::dispatcher::EventDispatcher;
use crate::lifecycle::{ControlReport, LifecycleController};
use crate::registry::{HandleKind, WorkerRegistry};

/// 显式构造的编排上下文
///
/// 持有注册表、生命周期控制器和事件分发器，启动时传给API层，退出时调用 [`FleetContext::shutdown`]。
pub struct FleetContext {
    pub records: Arc<dyn WorkerRecordRepository>,
    pub store: Arc<dyn StatusStore>,
    pub provisioner: Arc<RuntimeProvisioner>,
    pub registry: Arc<WorkerRegistry>,
    pub controller: Arc<LifecycleController>,
    pub dispatcher: Arc<EventDispatcher>,
    config: DispatcherConfig,
}

impl FleetContext {
    /// 必须在tokio运行时内调用
    pub fn new(
        records: Arc<dyn WorkerRecordRepository>,
        store: Arc<dyn StatusStore>,
        provisioner: Arc<RuntimeProvisioner>,
        config: DispatcherConfig,
    ) -> FleetResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| FleetError::Internal(format!("编排上下文需要tokio运行时: {e}")))?;
        let registry = Arc::new(WorkerRegistry::new());
        let controller = Arc::new(LifecycleController::new(
            records.clone(),
            store.clone(),
            provisioner.clone(),
            registry.clone(),
        ));
        let dispatcher = Arc::new(
            EventDispatcher::new(records.clone(), store.clone(), registry.clone(), runtime)
                .with_stats_refresh(config.stats_refresh_enabled),
        );
        Ok(Self {
            records,
            store,
            provisioner,
            registry,
            controller,
            dispatcher,
            config,
        })
    }

    /// 按应用配置组装全部组件
    pub async fn build(config: &AppConfig) -> FleetResult<Self> {
        let store = StatusStoreFactory::create(&config.status_store).await?;
        let records: Arc<dyn WorkerRecordRepository> =
            Arc::new(InMemoryWorkerRecordRepository::from_seeds(&config.workers));
        let backend = create_backend(&config.provisioner, store.clone());
        // 独立运行单元只能通过共享存储的URL登记自己的状态
        let status_url = match config.status_store.backend {
            StatusStoreKind::Redis => config.status_store.url.clone(),
            StatusStoreKind::Memory => String::new(),
        };
        let provisioner = Arc::new(RuntimeProvisioner::new(
            config.provisioner.clone(),
            status_url,
            backend,
            store.clone(),
        ));
        info!(
            backend = provisioner.backend_kind(),
            seeds = config.workers.len(),
            "Orchestration context ready"
        );
        Self::new(records, store, provisioner, config.dispatcher.clone())
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// 启动时对账，然后启动标记为 `autostart` 的Worker
    pub async fn startup(&self, seeds: &[WorkerSeedConfig]) -> FleetResult<Vec<ControlReport>> {
        if self.config.reconcile_on_startup {
            let reconciled = self.controller.reconcile_all().await?;
            info!("Startup reconcile covered {} workers", reconciled.len());
        }
        Ok(self.autostart(seeds).await)
    }

    pub async fn autostart(&self, seeds: &[WorkerSeedConfig]) -> Vec<ControlReport> {
        let starts = seeds.iter().filter(|seed| seed.autostart).map(|seed| {
            self.controller
                .start(&seed.identity, seed.worker_type, seed.config.clone())
        });
        let results = join_all(starts).await;

        let autostart = seeds.iter().filter(|seed| seed.autostart);
        let mut reports = Vec::new();
        for (seed, result) in autostart.zip(results) {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => warn!(
                    identity = %redact_identity(&seed.identity),
                    "Autostart failed: {}", e
                ),
            }
        }
        reports
    }

    /// 周期性对账，间隔为0时不启动
    pub fn spawn_reconcile_loop(
        &self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Option<JoinHandle<()>> {
        if self.config.reconcile_interval_seconds == 0 {
            return None;
        }
        let period = Duration::from_secs(self.config.reconcile_interval_seconds);
        let controller = self.controller.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // 第一次tick立即返回，启动对账已经做过
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = controller.reconcile_all().await {
                            warn!("Periodic reconcile failed: {}", e);
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Reconcile loop stopped");
                        break;
                    }
                }
            }
        }))
    }

    /// 停止进程内Worker；独立运行单元保持运行，下一次 start/reconcile 时重新连接
    pub async fn shutdown(&self) {
        let handles = self.registry.drain();
        let mut stopped = 0;
        for handle in &handles {
            match handle.kind {
                HandleKind::Local => match self.controller.stop(&handle.identity).await {
                    Ok(_) => stopped += 1,
                    Err(e) => warn!(
                        identity = %redact_identity(&handle.identity),
                        "Failed to stop worker during shutdown: {}", e
                    ),
                },
                HandleKind::Remote => {}
            }
        }
        info!(
            "Orchestration context shut down: {} local workers stopped, {} remote handles released",
            stopped,
            handles.len() - stopped
        );
    }
}
