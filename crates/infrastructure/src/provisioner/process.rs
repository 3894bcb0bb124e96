use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use botfleet_core::config::ProcessConfig;
use botfleet_core::models::{RuntimeInfo, UnitSpec};
use botfleet_core::{FleetError, FleetResult};
use botfleet_worker::WorkerHost;
use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::backend::UnitBackend;

struct ProcessUnit {
    child: tokio::sync::Mutex<Child>,
    port: u16,
    created_at: DateTime<Utc>,
}

impl ProcessUnit {
    fn info(&self, name: &str) -> RuntimeInfo {
        let (active, state) = match self.child.try_lock() {
            Ok(mut child) => match child.try_wait() {
                Ok(None) => (true, "running".to_string()),
                Ok(Some(status)) => (false, format!("exited({})", status.code().unwrap_or(-1))),
                Err(e) => (false, format!("unknown: {e}")),
            },
            // stop 正在等待进程退出
            Err(_) => (true, "stopping".to_string()),
        };
        RuntimeInfo {
            name: name.to_string(),
            active,
            state,
            port: Some(self.port),
            created_at: Some(self.created_at),
        }
    }
}

/// 每个Worker一个本地子进程（默认运行 `botfleet unit`）
///
/// 只能管理由当前控制进程创建的子进程。
pub struct ProcessBackend {
    config: ProcessConfig,
    units: Mutex<HashMap<String, Arc<ProcessUnit>>>,
}

impl ProcessBackend {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            units: Mutex::new(HashMap::new()),
        }
    }

    fn program(&self) -> FleetResult<String> {
        match &self.config.program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe()
                .map(|path| path.to_string_lossy().into_owned())
                .map_err(|e| FleetError::Provisioning(format!("无法确定当前可执行文件: {e}"))),
        }
    }

    fn unit(&self, name: &str) -> Option<Arc<ProcessUnit>> {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    async fn terminate(&self, name: &str, child: &mut Child) -> FleetResult<()> {
        if !matches!(child.try_wait(), Ok(None)) {
            return Ok(());
        }

        if let Some(pid) = child.id() {
            send_terminate(pid).await;
        }

        let grace = Duration::from_secs(self.config.stop_grace_seconds);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(unit = %name, "Unit process exited with {}", status);
                Ok(())
            }
            Ok(Err(e)) => Err(FleetError::Provisioning(format!("等待单元进程退出失败: {e}"))),
            Err(_) => {
                warn!(unit = %name, "Unit process ignored SIGTERM, killing");
                child
                    .kill()
                    .await
                    .map_err(|e| FleetError::Provisioning(format!("强制结束单元进程失败: {e}")))
            }
        }
    }
}

#[cfg(unix)]
async fn send_terminate(pid: u32) {
    match Command::new("kill").arg("-TERM").arg(pid.to_string()).output().await {
        Ok(output) if output.status.success() => {}
        Ok(output) => warn!(
            "kill -TERM {} failed: {}",
            pid,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(e) => warn!("Failed to run kill for {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
async fn send_terminate(_pid: u32) {}

#[async_trait]
impl UnitBackend for ProcessBackend {
    fn kind(&self) -> &'static str {
        "process"
    }

    async fn inspect(&self, name: &str) -> FleetResult<Option<RuntimeInfo>> {
        Ok(self.unit(name).map(|unit| unit.info(name)))
    }

    async fn launch(&self, spec: &UnitSpec) -> FleetResult<()> {
        let program = self.program()?;
        let child = Command::new(&program)
            .args(&self.config.args)
            .envs(spec.env())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| FleetError::Provisioning(format!("启动单元进程 {program} 失败: {e}")))?;

        info!(
            unit = %spec.name,
            port = spec.port,
            pid = child.id().unwrap_or_default(),
            "Unit process launched"
        );

        let unit = Arc::new(ProcessUnit {
            child: tokio::sync::Mutex::new(child),
            port: spec.port,
            created_at: Utc::now(),
        });
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.name.clone(), unit);
        Ok(())
    }

    async fn stop(&self, name: &str) -> FleetResult<()> {
        let Some(unit) = self.unit(name) else {
            return Ok(());
        };
        let mut child = unit.child.lock().await;
        self.terminate(name, &mut child).await
    }

    async fn remove(&self, name: &str) -> FleetResult<()> {
        let Some(unit) = self.unit(name) else {
            return Ok(());
        };
        {
            let mut child = unit.child.lock().await;
            if matches!(child.try_wait(), Ok(None)) {
                child
                    .kill()
                    .await
                    .map_err(|e| FleetError::Provisioning(format!("强制结束单元进程失败: {e}")))?;
            }
        }
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> FleetResult<Vec<RuntimeInfo>> {
        let units: Vec<(String, Arc<ProcessUnit>)> = self
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, unit)| (name.clone(), unit.clone()))
            .collect();
        Ok(units.iter().map(|(name, unit)| unit.info(name)).collect())
    }

    fn attach(&self, _name: &str) -> Option<Arc<WorkerHost>> {
        None
    }
}
