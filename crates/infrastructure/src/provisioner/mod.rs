//! # 运行单元管理器
//!
//! 为每个Worker创建一个隔离的运行单元，并负责端口分配和状态轮询。
//!
//! ```text
//! provision(identity)
//!   ├─ 名称 = prefix + identity末尾8个字符
//!   ├─ 同名单元存在且活动 → 直接复用
//!   ├─ 同名单元存在但不活动 → 强制删除
//!   ├─ [全局端口锁] 列出已占用端口 → 选出 >= base_port 的最小空闲端口 → 预留
//!   ├─ backend.launch(spec)（携带环境变量契约）
//!   └─ 释放预留（单元本身此后占用该端口，直到被删除；调用被取消时由守卫释放）
//! ```
//!
//! 单元的状态由单元自己异步写入状态存储，因此 `status` / `await_registration`
//! 以固定间隔轮询，超时返回软失败记录而不是错误。

pub mod backend;
pub mod docker;
pub mod in_process;
pub mod process;

pub use backend::UnitBackend;
pub use docker::DockerBackend;
pub use in_process::{builtin_factory, InProcessBackend, WorkerFactory};
pub use process::ProcessBackend;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use botfleet_core::config::{ProvisionerConfig, RuntimeBackendKind};
use botfleet_core::models::{
    callback_url, redact_identity, unit_name, ProvisionedUnit, RuntimeInfo, StatusRecord,
    UnitSpec, WorkerConfig, WorkerStatus, WorkerType,
};
use botfleet_core::{FleetError, FleetResult, StatusStore};
use botfleet_worker::{ProxyWorker, WorkerHost};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct RuntimeProvisioner {
    config: ProvisionerConfig,
    status_url: String,
    backend: Arc<dyn UnitBackend>,
    store: Arc<dyn StatusStore>,
    /// 串行化端口选择
    allocation: Mutex<()>,
    /// 已选出但单元尚未创建完成的端口
    reserved: Arc<StdMutex<BTreeSet<u16>>>,
}

/// 端口预留，离开作用域时释放
struct PortReservation {
    port: u16,
    reserved: Arc<StdMutex<BTreeSet<u16>>>,
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.port);
    }
}

/// 按配置构造运行单元后端
pub fn create_backend(
    config: &ProvisionerConfig,
    store: Arc<dyn StatusStore>,
) -> Arc<dyn UnitBackend> {
    match config.backend {
        RuntimeBackendKind::Docker => Arc::new(DockerBackend::new(config.docker.clone())),
        RuntimeBackendKind::Process => Arc::new(ProcessBackend::new(config.process.clone())),
        RuntimeBackendKind::InProcess => Arc::new(InProcessBackend::new(store)),
    }
}

fn as_provisioning_error(err: FleetError) -> FleetError {
    match err {
        FleetError::Provisioning(_)
        | FleetError::PortExhausted { .. }
        | FleetError::ContractViolation(_) => err,
        other => FleetError::Provisioning(other.to_string()),
    }
}

impl RuntimeProvisioner {
    pub fn new(
        config: ProvisionerConfig,
        status_url: impl Into<String>,
        backend: Arc<dyn UnitBackend>,
        store: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            config,
            status_url: status_url.into(),
            backend,
            store,
            allocation: Mutex::new(()),
            reserved: Arc::new(StdMutex::new(BTreeSet::new())),
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub fn unit_name(&self, identity: &str) -> String {
        unit_name(&self.config.name_prefix, identity)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.config.status_timeout_seconds)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.status_poll_interval_ms.max(1))
    }

    async fn reserve_port(&self) -> FleetResult<PortReservation> {
        let _allocating = self.allocation.lock().await;
        // 列出单元期间释放的预留可能还没出现在列表里，按列出前的快照一并排除
        let in_flight = self.reserved_ports();
        let allocated: BTreeSet<u16> = self
            .backend
            .list(&self.config.name_prefix)
            .await?
            .into_iter()
            .filter_map(|unit| unit.port)
            .chain(in_flight)
            .collect();

        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        let port = (self.config.base_port..=self.config.max_port)
            .find(|port| !allocated.contains(port) && !reserved.contains(port))
            .ok_or(FleetError::PortExhausted {
                base: self.config.base_port,
                max: self.config.max_port,
            })?;
        reserved.insert(port);
        Ok(PortReservation {
            port,
            reserved: self.reserved.clone(),
        })
    }

    fn reserved_ports(&self) -> BTreeSet<u16> {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 为Worker创建运行单元
    pub async fn provision(
        &self,
        identity: &str,
        worker_type: WorkerType,
        config: &WorkerConfig,
    ) -> FleetResult<ProvisionedUnit> {
        let name = self.unit_name(identity);
        let who = redact_identity(identity);

        if let Some(existing) = self.backend.inspect(&name).await? {
            if existing.active {
                let port = existing.port.ok_or_else(|| {
                    FleetError::Provisioning(format!("运行单元 {name} 缺少端口信息"))
                })?;
                info!(identity = %who, unit = %name, port, "Reusing active unit");
                return Ok(ProvisionedUnit {
                    identity: identity.to_string(),
                    name,
                    port,
                    callback_url: callback_url(&self.config.callback_host, identity),
                    reused: true,
                });
            }
            warn!(identity = %who, unit = %name, state = %existing.state, "Removing inactive unit");
            self.backend.remove(&name).await.map_err(as_provisioning_error)?;
        }

        let reservation = self.reserve_port().await?;
        let port = reservation.port;
        let spec = UnitSpec {
            identity: identity.to_string(),
            worker_type,
            config: config.clone(),
            name: name.clone(),
            port,
            callback_host: self.config.callback_host.clone(),
            status_url: self.status_url.clone(),
        };
        let launched = self.backend.launch(&spec).await;
        drop(reservation);

        if let Err(e) = launched {
            let err = as_provisioning_error(e);
            warn!(identity = %who, unit = %name, port, "Unit launch failed: {}", err);
            let record = StatusRecord::new(WorkerStatus::Error)
                .with_unit(&name, port)
                .with_error(err.to_string());
            if let Err(store_err) = self.store.put_status(identity, &record).await {
                warn!(identity = %who, "Failed to record launch failure: {}", store_err);
            }
            return Err(err);
        }

        metrics::counter!("botfleet_units_provisioned_total").increment(1);
        info!(identity = %who, unit = %name, port, backend = self.backend.kind(), "Unit provisioned");
        Ok(ProvisionedUnit {
            identity: identity.to_string(),
            callback_url: spec.callback_url(),
            name,
            port,
            reused: false,
        })
    }

    /// 停止并删除运行单元；单元不存在时直接返回
    pub async fn deprovision(&self, identity: &str) -> FleetResult<()> {
        let name = self.unit_name(identity);
        if self.backend.inspect(&name).await?.is_none() {
            debug!(unit = %name, "No unit to deprovision");
            return Ok(());
        }

        if let Err(e) = self.backend.stop(&name).await {
            warn!(unit = %name, "Unit stop failed, removing anyway: {}", e);
        }
        self.backend.remove(&name).await.map_err(as_provisioning_error)?;
        info!(identity = %redact_identity(identity), unit = %name, "Unit deprovisioned");
        Ok(())
    }

    /// 轮询状态存储直到出现状态记录，超时返回 `unknown` 记录
    pub async fn status(&self, identity: &str, timeout: Duration) -> FleetResult<StatusRecord> {
        self.poll(identity, timeout, |_| true).await
    }

    /// 等待运行单元登记自己的最终状态（running / stopped / error）
    pub async fn await_registration(
        &self,
        identity: &str,
        unit: &ProvisionedUnit,
        timeout: Duration,
    ) -> FleetResult<StatusRecord> {
        if unit.reused {
            return Ok(StatusRecord::new(WorkerStatus::Running)
                .with_unit(&unit.name, unit.port)
                .with_webhook_url(&unit.callback_url));
        }
        self.poll(identity, timeout, |record| {
            record.name == unit.name && record.status.is_settled()
        })
        .await
    }

    async fn poll<P>(&self, identity: &str, timeout: Duration, accept: P) -> FleetResult<StatusRecord>
    where
        P: Fn(&StatusRecord) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            match self.store.get_status(identity).await {
                Ok(Some(record)) if accept(&record) => return Ok(record),
                Ok(_) => {}
                Err(e) => warn!(
                    identity = %redact_identity(identity),
                    "Status poll failed: {}", e
                ),
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(identity = %redact_identity(identity), "Status poll timed out");
                return Ok(StatusRecord::timed_out());
            }
            tokio::time::sleep(self.poll_interval().min(deadline - now)).await;
        }
    }

    pub async fn inspect(&self, identity: &str) -> FleetResult<Option<RuntimeInfo>> {
        self.backend.inspect(&self.unit_name(identity)).await
    }

    /// 后端中所有符合命名规则的单元（不依赖状态存储）
    pub async fn list(&self) -> FleetResult<Vec<RuntimeInfo>> {
        self.backend.list(&self.config.name_prefix).await
    }

    /// 获取可以向单元提交事件的Worker宿主
    pub async fn connect(&self, unit: &ProvisionedUnit) -> FleetResult<Arc<WorkerHost>> {
        if let Some(host) = self.backend.attach(&unit.name) {
            return Ok(host);
        }

        let name = unit.name.clone();
        let base_url = format!("http://{}:{}", self.config.unit_host, unit.port);
        let attempts = (self.status_timeout().as_millis() / 200).max(1) as u32;
        let host = WorkerHost::spawn(unit.name.clone(), move || {
            Box::new(
                ProxyWorker::new(name, base_url)
                    .with_startup_retries(attempts, Duration::from_millis(200)),
            )
        })?;
        host.start().await?;
        Ok(host)
    }
}
