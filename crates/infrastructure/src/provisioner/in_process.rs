use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use botfleet_core::models::{RuntimeInfo, StatusRecord, UnitSpec, WorkerStatus};
use botfleet_core::{FleetResult, StatusStore, WorkerRuntime};
use botfleet_worker::WorkerHost;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::backend::UnitBackend;

/// 根据单元参数构造Worker实例
pub type WorkerFactory = Arc<dyn Fn(&UnitSpec) -> Box<dyn WorkerRuntime> + Send + Sync>;

pub fn builtin_factory() -> WorkerFactory {
    Arc::new(|spec: &UnitSpec| botfleet_worker::instantiate(spec.worker_type))
}

struct HostedUnit {
    identity: String,
    host: Arc<WorkerHost>,
    port: u16,
    created_at: DateTime<Utc>,
    active: bool,
}

impl HostedUnit {
    fn info(&self, name: &str) -> RuntimeInfo {
        RuntimeInfo {
            name: name.to_string(),
            active: self.active,
            state: if self.active { "running" } else { "stopped" }.to_string(),
            port: Some(self.port),
            created_at: Some(self.created_at),
        }
    }
}

/// 单元即控制进程内的一个Worker宿主线程
///
/// 与独立运行单元一样，由后端自己向状态存储登记 starting / running / stopped。
/// 端口只作为单元标识参与分配，不会真正监听。
pub struct InProcessBackend {
    store: Arc<dyn StatusStore>,
    factory: WorkerFactory,
    units: Mutex<HashMap<String, HostedUnit>>,
}

impl InProcessBackend {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self::with_factory(store, builtin_factory())
    }

    pub fn with_factory(store: Arc<dyn StatusStore>, factory: WorkerFactory) -> Self {
        Self {
            store,
            factory,
            units: Mutex::new(HashMap::new()),
        }
    }

    fn units(&self) -> std::sync::MutexGuard<'_, HashMap<String, HostedUnit>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn bring_up(&self, spec: &UnitSpec) -> FleetResult<Arc<WorkerHost>> {
        let factory = self.factory.clone();
        let unit_spec = spec.clone();
        let host = WorkerHost::spawn(spec.name.clone(), move || factory(&unit_spec))?;
        host.initialize(spec.config.clone()).await?;
        host.start().await?;
        Ok(host)
    }
}

#[async_trait]
impl UnitBackend for InProcessBackend {
    fn kind(&self) -> &'static str {
        "in_process"
    }

    async fn inspect(&self, name: &str) -> FleetResult<Option<RuntimeInfo>> {
        Ok(self.units().get(name).map(|unit| unit.info(name)))
    }

    async fn launch(&self, spec: &UnitSpec) -> FleetResult<()> {
        self.store
            .put_status(
                &spec.identity,
                &StatusRecord::new(WorkerStatus::Starting).with_unit(&spec.name, spec.port),
            )
            .await?;

        let host = match self.bring_up(spec).await {
            Ok(host) => host,
            Err(e) => {
                let record = StatusRecord::new(WorkerStatus::Error)
                    .with_unit(&spec.name, spec.port)
                    .with_error(e.to_string());
                if let Err(store_err) = self.store.put_status(&spec.identity, &record).await {
                    warn!(unit = %spec.name, "Failed to record unit error: {}", store_err);
                }
                return Err(e);
            }
        };

        self.units().insert(
            spec.name.clone(),
            HostedUnit {
                identity: spec.identity.clone(),
                host,
                port: spec.port,
                created_at: Utc::now(),
                active: true,
            },
        );

        let record = StatusRecord::new(WorkerStatus::Running)
            .with_unit(&spec.name, spec.port)
            .with_webhook_url(spec.callback_url());
        self.store.put_status(&spec.identity, &record).await?;
        info!(unit = %spec.name, port = spec.port, "In-process unit running");
        Ok(())
    }

    async fn stop(&self, name: &str) -> FleetResult<()> {
        let target = {
            let mut units = self.units();
            match units.get_mut(name) {
                Some(unit) if unit.active => {
                    unit.active = false;
                    Some((unit.identity.clone(), unit.host.clone()))
                }
                _ => None,
            }
        };
        let Some((identity, host)) = target else {
            return Ok(());
        };

        self.store
            .put_status(&identity, &StatusRecord::new(WorkerStatus::Stopping))
            .await?;
        if let Err(e) = host.stop().await {
            warn!(unit = %name, "Worker stop failed: {}", e);
        }
        self.store
            .put_status(&identity, &StatusRecord::new(WorkerStatus::Stopped))
            .await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> FleetResult<()> {
        let removed = self.units().remove(name);
        if let Some(unit) = removed {
            if unit.active {
                // 强制删除：不再等待 stop
                warn!(unit = %name, "Removing active in-process unit");
            }
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> FleetResult<Vec<RuntimeInfo>> {
        let mut units: Vec<RuntimeInfo> = self
            .units()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, unit)| unit.info(name))
            .collect();
        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(units)
    }

    fn attach(&self, name: &str) -> Option<Arc<WorkerHost>> {
        self.units()
            .get(name)
            .filter(|unit| unit.active)
            .map(|unit| unit.host.clone())
    }
}
