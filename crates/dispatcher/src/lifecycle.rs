//! # 生命周期控制器
//!
//! 驱动每个Worker的状态机，并把每一次状态变化同时写入Worker记录和共享状态存储：
//!
//! ```text
//! start:   stopped|error|unknown → starting → provision → await_registration → connect → running
//!                                      └──────────── 任一步失败 ────────────→ error
//! stop:    running|error|unknown → stopping → deprovision → stopped（清除单元信息）
//!                                      └──────── 失败 ────────→ error
//! restart: 同一把锁内 stop 后 start；旧单元未能销毁时不再 start
//! ```
//!
//! 同一identity的 start/stop/restart/reconcile 由每个identity一把的异步互斥锁串行化，
//! 不同identity之间完全并发。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use botfleet_core::config::RuntimeBackendKind;
use botfleet_core::models::{
    callback_url, redact_identity, ProvisionedUnit, StatusRecord, WorkerConfig, WorkerRecord,
    WorkerStatus, WorkerType,
};
use botfleet_core::{FleetError, FleetResult, StatusStore, WorkerRecordRepository};
use botfleet_infrastructure::RuntimeProvisioner;
use botfleet_worker::WorkerHost;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::registry::{HandleKind, WorkerHandle, WorkerRegistry};

/// 控制操作实际执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Started,
    AlreadyRunning,
    Stopped,
    AlreadyStopped,
    Restarted,
    Reconciled,
    Queried,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Started => "started",
            ControlAction::AlreadyRunning => "already_running",
            ControlAction::Stopped => "stopped",
            ControlAction::AlreadyStopped => "already_stopped",
            ControlAction::Restarted => "restarted",
            ControlAction::Reconciled => "reconciled",
            ControlAction::Queried => "queried",
        }
    }

    /// 已处于目标状态，没有发生任何变化
    pub fn is_noop(&self) -> bool {
        matches!(self, ControlAction::AlreadyRunning | ControlAction::AlreadyStopped)
    }
}

/// 控制操作的结果，调用方据此区分“已处于目标状态”和“转换失败”
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlReport {
    pub identity: String,
    pub action: ControlAction,
    pub status: WorkerStatus,
    pub error: Option<String>,
    pub webhook_url: Option<String>,
    pub unit_name: Option<String>,
    pub port: Option<u16>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl ControlReport {
    pub fn from_record(record: &WorkerRecord, action: ControlAction) -> Self {
        Self {
            identity: record.identity.clone(),
            action,
            status: record.status,
            error: record.error_message.clone(),
            webhook_url: record.webhook_url.clone(),
            unit_name: record.unit_name.clone(),
            port: record.port,
            last_activity: record.last_activity,
        }
    }

    pub fn from_status(identity: &str, status: &StatusRecord, action: ControlAction) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            identity: identity.to_string(),
            action,
            status: status.status,
            error: status.error_text().map(str::to_string),
            webhook_url: non_empty(&status.webhook_url),
            unit_name: non_empty(&status.name),
            port: status.port,
            last_activity: status.last_update,
        }
    }
}

fn to_status_record(record: &WorkerRecord) -> StatusRecord {
    StatusRecord {
        status: record.status,
        error: record.error_message.clone().unwrap_or_default(),
        webhook_url: record.webhook_url.clone().unwrap_or_default(),
        name: record.unit_name.clone().unwrap_or_default(),
        port: record.port,
        last_update: Some(Utc::now()),
    }
}

fn transition(record: &mut WorkerRecord, next: WorkerStatus) -> FleetResult<()> {
    if !record.status.can_transition_to(next) {
        return Err(FleetError::InvalidTransition {
            from: record.status,
            to: next,
        });
    }
    record.status = next;
    Ok(())
}

/// 持有锁时看到的 starting/stopping 只可能是上一个控制进程中断留下的
fn clear_stale_transition(record: &mut WorkerRecord) {
    if matches!(record.status, WorkerStatus::Starting | WorkerStatus::Stopping) {
        warn!(
            identity = %redact_identity(&record.identity),
            status = %record.status,
            "Found interrupted transition, treating status as unknown"
        );
        record.status = WorkerStatus::Unknown;
    }
}

fn observe(operation: &'static str, result: &FleetResult<ControlReport>) {
    let outcome = match result {
        Ok(report) if report.action.is_noop() => "noop",
        Ok(_) => "ok",
        Err(_) => "error",
    };
    metrics::counter!("botfleet_lifecycle_total", "operation" => operation, "result" => outcome)
        .increment(1);
}

type LockTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// 持有期间独占一个identity；释放后没有其他等待者时从锁表中移除
struct IdentityGuard<'a> {
    locks: &'a LockTable,
    identity: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.identity)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.identity);
        }
    }
}

pub struct LifecycleController {
    records: Arc<dyn WorkerRecordRepository>,
    store: Arc<dyn StatusStore>,
    provisioner: Arc<RuntimeProvisioner>,
    registry: Arc<WorkerRegistry>,
    locks: LockTable,
}

impl LifecycleController {
    pub fn new(
        records: Arc<dyn WorkerRecordRepository>,
        store: Arc<dyn StatusStore>,
        provisioner: Arc<RuntimeProvisioner>,
        registry: Arc<WorkerRegistry>,
    ) -> Self {
        Self {
            records,
            store,
            provisioner,
            registry,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock(&self, identity: &str) -> IdentityGuard<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(identity.to_string())
            .or_default()
            .clone();
        IdentityGuard {
            locks: &self.locks,
            identity: identity.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn persist(&self, record: &WorkerRecord) -> FleetResult<()> {
        self.records.upsert(record).await?;
        self.store
            .put_status(&record.identity, &to_status_record(record))
            .await
    }

    /// 失败路径上的写入，写入失败只记录日志
    async fn persist_quietly(&self, record: &WorkerRecord) {
        if let Err(e) = self.persist(record).await {
            warn!(
                identity = %redact_identity(&record.identity),
                "Failed to persist status {}: {}", record.status, e
            );
        }
    }

    async fn load(&self, identity: &str) -> FleetResult<WorkerRecord> {
        self.records
            .get(identity)
            .await?
            .ok_or_else(|| FleetError::WorkerNotFound {
                identity: redact_identity(identity),
            })
    }

    fn handle_kind(&self) -> HandleKind {
        match self.provisioner.config().backend {
            RuntimeBackendKind::InProcess => HandleKind::Local,
            RuntimeBackendKind::Docker | RuntimeBackendKind::Process => HandleKind::Remote,
        }
    }

    /// 启动Worker；已在运行时返回 `AlreadyRunning` 报告而不是错误
    pub async fn start(
        &self,
        identity: &str,
        worker_type: WorkerType,
        config: WorkerConfig,
    ) -> FleetResult<ControlReport> {
        let _guard = self.lock(identity).await;
        let result = self.start_locked(identity, worker_type, config).await;
        observe("start", &result);
        result
    }

    async fn start_locked(
        &self,
        identity: &str,
        worker_type: WorkerType,
        config: WorkerConfig,
    ) -> FleetResult<ControlReport> {
        let who = redact_identity(identity);
        let mut record = match self.records.get(identity).await? {
            Some(mut existing) => {
                existing.worker_type = worker_type;
                existing.config = config;
                existing
            }
            None => WorkerRecord::new(identity, worker_type, config),
        };

        if record.status.is_running() {
            if self.registry.contains(identity) {
                info!(identity = %who, "Worker already running");
                return Ok(ControlReport::from_record(&record, ControlAction::AlreadyRunning));
            }
            // 控制进程重启后本地没有句柄，重新走启动流程以复用仍在运行的单元
            info!(identity = %who, "Worker marked running without a live handle, re-attaching");
            record.status = WorkerStatus::Unknown;
        }
        clear_stale_transition(&mut record);

        if let Some(stale) = self.registry.remove(identity) {
            debug!(identity = %who, unit = %stale.unit_name, "Dropped stale handle before start");
        }

        transition(&mut record, WorkerStatus::Starting)?;
        record.error_message = None;
        self.persist(&record).await?;
        info!(identity = %who, worker_type = %record.worker_type, "Starting worker");

        match self.bring_up(&mut record).await {
            Ok(()) => {
                info!(
                    identity = %who,
                    unit = record.unit_name.as_deref().unwrap_or_default(),
                    port = record.port.unwrap_or_default(),
                    "Worker running"
                );
                Ok(ControlReport::from_record(&record, ControlAction::Started))
            }
            Err(e) => {
                self.registry.remove(identity);
                record.status = WorkerStatus::Error;
                record.error_message = Some(e.to_string());
                self.persist_quietly(&record).await;
                error!(identity = %who, "Worker failed to start: {}", e);
                Err(e)
            }
        }
    }

    async fn bring_up(&self, record: &mut WorkerRecord) -> FleetResult<()> {
        let identity = record.identity.clone();
        let unit = self
            .provisioner
            .provision(&identity, record.worker_type, &record.config)
            .await?;

        let timeout = self.provisioner.status_timeout();
        let registered = self
            .provisioner
            .await_registration(&identity, &unit, timeout)
            .await?;
        match registered.status {
            WorkerStatus::Running => {}
            WorkerStatus::Unknown => {
                return Err(FleetError::Timeout(format!(
                    "运行单元 {} 未在 {}s 内登记状态",
                    unit.name,
                    timeout.as_secs()
                )))
            }
            other => {
                return Err(FleetError::Provisioning(
                    registered
                        .error_text()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("运行单元 {} 状态为 {other}", unit.name)),
                ))
            }
        }

        let host = self.provisioner.connect(&unit).await?;
        self.register_handle(&unit, host);

        transition(record, WorkerStatus::Running)?;
        record.webhook_url = Some(unit.callback_url.clone());
        record.unit_name = Some(unit.name.clone());
        record.port = Some(unit.port);
        record.last_activity = Some(Utc::now());
        self.persist(record).await
    }

    fn register_handle(&self, unit: &ProvisionedUnit, host: Arc<WorkerHost>) {
        let handle = WorkerHandle::new(
            &unit.identity,
            &unit.name,
            unit.port,
            self.handle_kind(),
            host,
        );
        if let Some(previous) = self.registry.add(handle) {
            warn!(
                identity = %redact_identity(&unit.identity),
                unit = %previous.unit_name,
                "Replaced an existing worker handle"
            );
        }
    }

    /// 停止Worker；已停止时返回 `AlreadyStopped` 报告且不写入任何状态
    pub async fn stop(&self, identity: &str) -> FleetResult<ControlReport> {
        let _guard = self.lock(identity).await;
        let result = self.stop_locked(identity).await;
        observe("stop", &result);
        result
    }

    async fn stop_locked(&self, identity: &str) -> FleetResult<ControlReport> {
        let who = redact_identity(identity);
        let mut record = self.load(identity).await?;

        if record.status == WorkerStatus::Stopped {
            debug!(identity = %who, "Worker already stopped");
            return Ok(ControlReport::from_record(&record, ControlAction::AlreadyStopped));
        }
        clear_stale_transition(&mut record);

        transition(&mut record, WorkerStatus::Stopping)?;
        self.persist(&record).await?;
        info!(identity = %who, "Stopping worker");

        if let Some(handle) = self.registry.remove(identity) {
            debug!(identity = %who, unit = %handle.unit_name, "Worker handle removed");
        }

        match self.provisioner.deprovision(identity).await {
            Ok(()) => {
                transition(&mut record, WorkerStatus::Stopped)?;
                record.error_message = None;
                record.clear_unit();
                self.persist(&record).await?;
                info!(identity = %who, "Worker stopped");
                Ok(ControlReport::from_record(&record, ControlAction::Stopped))
            }
            Err(e) => {
                record.status = WorkerStatus::Error;
                record.error_message = Some(e.to_string());
                self.persist_quietly(&record).await;
                error!(identity = %who, "Worker failed to stop: {}", e);
                Err(e)
            }
        }
    }

    /// 先停止再启动；两步都失败时两个错误都会保留在状态记录中
    ///
    /// 停止失败且旧单元仍然存在时直接返回停止错误，不会复用旧单元冒充重启成功。
    pub async fn restart(&self, identity: &str) -> FleetResult<ControlReport> {
        let _guard = self.lock(identity).await;
        let result = self.restart_locked(identity).await;
        observe("restart", &result);
        result
    }

    async fn restart_locked(&self, identity: &str) -> FleetResult<ControlReport> {
        let who = redact_identity(identity);
        let record = self.load(identity).await?;
        let (worker_type, config) = (record.worker_type, record.config);

        let stopped = self.stop_locked(identity).await;
        if let Err(e) = &stopped {
            if !matches!(self.provisioner.inspect(identity).await, Ok(None)) {
                error!(identity = %who, "Old unit survived stop, restart aborted: {}", e);
                return stopped;
            }
            warn!(identity = %who, "Stop failed during restart but the unit is gone, starting anyway: {}", e);
        }

        match (self.start_locked(identity, worker_type, config).await, stopped) {
            (Ok(mut report), stopped) => {
                report.action = ControlAction::Restarted;
                if let Err(e) = stopped {
                    report.error = Some(format!("停止阶段失败: {e}"));
                }
                Ok(report)
            }
            (Err(start_err), Ok(_)) => Err(start_err),
            (Err(start_err), Err(stop_err)) => {
                let err = FleetError::RestartFailed {
                    stop: stop_err.to_string(),
                    start: start_err.to_string(),
                };
                if let Ok(Some(mut record)) = self.records.get(identity).await {
                    record.status = WorkerStatus::Error;
                    record.error_message = Some(err.to_string());
                    self.persist_quietly(&record).await;
                }
                Err(err)
            }
        }
    }

    /// 用共享存储中的权威状态覆盖本地缓存
    ///
    /// 状态不再是 running 时丢弃注册表中的句柄；状态仍是 running 但本地没有句柄时，
    /// 如果运行单元仍然活动则重新连接。
    pub async fn reconcile(&self, identity: &str) -> FleetResult<ControlReport> {
        let _guard = self.lock(identity).await;
        let result = self.reconcile_locked(identity).await;
        observe("reconcile", &result);
        result
    }

    async fn reconcile_locked(&self, identity: &str) -> FleetResult<ControlReport> {
        let who = redact_identity(identity);
        let mut record = self.load(identity).await?;
        let Some(authoritative) = self.store.get_status(identity).await? else {
            // 从未启动过的Worker没有状态记录，本地状态就是权威状态
            if !record.status.is_running() {
                if let Some(handle) = self.registry.remove(identity) {
                    info!(identity = %who, unit = %handle.unit_name, "Dropped handle of worker without a status record");
                }
            }
            debug!(identity = %who, status = %record.status, "No shared status record, keeping cached status");
            return Ok(ControlReport::from_record(&record, ControlAction::Reconciled));
        };

        if authoritative.status != record.status {
            info!(
                identity = %who,
                cached = %record.status,
                actual = %authoritative.status,
                "Status diverged, applying shared record"
            );
        }
        record.apply_status_record(&authoritative);

        if !record.status.is_running() {
            if let Some(handle) = self.registry.remove(identity) {
                info!(identity = %who, unit = %handle.unit_name, "Dropped handle of worker that is no longer running");
            }
        } else if !self.registry.contains(identity) {
            if let Err(e) = self.reattach(&record).await {
                warn!(identity = %who, "Could not re-attach running worker: {}", e);
            }
        }

        self.records.upsert(&record).await?;
        Ok(ControlReport::from_record(&record, ControlAction::Reconciled))
    }

    async fn reattach(&self, record: &WorkerRecord) -> FleetResult<()> {
        let who = redact_identity(&record.identity);
        let Some(info) = self.provisioner.inspect(&record.identity).await? else {
            warn!(identity = %who, "Shared record says running but no unit exists");
            return Ok(());
        };
        let port = match (info.active, info.port.or(record.port)) {
            (true, Some(port)) => port,
            _ => {
                warn!(identity = %who, unit = %info.name, state = %info.state, "Unit is not active, not re-attaching");
                return Ok(());
            }
        };

        let unit = ProvisionedUnit {
            identity: record.identity.clone(),
            name: info.name,
            port,
            callback_url: record.webhook_url.clone().unwrap_or_else(|| {
                callback_url(&self.provisioner.config().callback_host, &record.identity)
            }),
            reused: true,
        };
        let host = self.provisioner.connect(&unit).await?;
        self.register_handle(&unit, host);
        info!(identity = %who, unit = %unit.name, port, "Re-attached running unit");
        Ok(())
    }

    /// 对所有已知Worker记录执行对账，单个失败只记录日志
    pub async fn reconcile_all(&self) -> FleetResult<Vec<ControlReport>> {
        let records = self.records.list().await?;
        let results = join_all(
            records
                .iter()
                .map(|record| self.reconcile(&record.identity)),
        )
        .await;

        let mut reports = Vec::with_capacity(results.len());
        for (record, result) in records.iter().zip(results) {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => warn!(
                    identity = %redact_identity(&record.identity),
                    "Reconcile failed: {}", e
                ),
            }
        }
        debug!("Reconciled {} of {} workers", reports.len(), records.len());
        Ok(reports)
    }

    /// 当前状态，优先读取共享存储
    pub async fn status(&self, identity: &str) -> FleetResult<ControlReport> {
        if let Some(status) = self.store.get_status(identity).await? {
            return Ok(ControlReport::from_status(identity, &status, ControlAction::Queried));
        }
        let record = self.load(identity).await?;
        Ok(ControlReport::from_record(&record, ControlAction::Queried))
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn provisioner(&self) -> &Arc<RuntimeProvisioner> {
        &self.provisioner
    }
}
