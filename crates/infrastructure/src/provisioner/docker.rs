use std::process::Output;
use std::sync::Arc;

use async_trait::async_trait;
use botfleet_core::config::DockerConfig;
use botfleet_core::models::{RuntimeInfo, UnitSpec};
use botfleet_core::{FleetError, FleetResult};
use botfleet_worker::WorkerHost;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::backend::UnitBackend;

pub const PORT_LABEL: &str = "botfleet.port";
pub const UNIT_LABEL: &str = "botfleet.unit";

/// 每个Worker一个docker容器（通过docker CLI管理）
pub struct DockerBackend {
    config: DockerConfig,
}

/// `docker ps --format '{{json .}}'` 的一行
#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Labels", default)]
    labels: String,
    #[serde(rename = "CreatedAt", default)]
    created_at: String,
}

impl PsLine {
    fn label(&self, key: &str) -> Option<&str> {
        self.labels.split(',').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k.trim() == key).then_some(v.trim())
        })
    }

    fn into_info(self) -> RuntimeInfo {
        let port = self.label(PORT_LABEL).and_then(|p| p.parse().ok());
        // 形如 "2024-05-01 10:00:00 +0000 UTC"
        let created_at = self
            .created_at
            .get(..19)
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
            .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        RuntimeInfo {
            active: self.state == "running",
            name: self.names,
            state: self.state,
            port,
            created_at,
        }
    }
}

fn parse_ps_output(stdout: &str) -> Vec<RuntimeInfo> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<PsLine>(line) {
            Ok(parsed) => Some(parsed.into_info()),
            Err(e) => {
                warn!("Skipping unparsable docker ps line: {}", e);
                None
            }
        })
        .collect()
}

fn is_missing(output: &Output) -> bool {
    String::from_utf8_lossy(&output.stderr).contains("No such container")
}

impl DockerBackend {
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    async fn docker(&self, args: &[String]) -> FleetResult<Output> {
        debug!("{} {}", self.config.binary, args.join(" "));
        Command::new(&self.config.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| FleetError::Provisioning(format!("执行 {} 失败: {e}", self.config.binary)))
    }

    fn failure(action: &str, output: &Output) -> FleetError {
        FleetError::Provisioning(format!(
            "docker {action} 失败 (exit {}): {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }

    async fn ps(&self, name_filter: &str) -> FleetResult<Vec<RuntimeInfo>> {
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("name={name_filter}"),
            "--format".to_string(),
            "{{json .}}".to_string(),
        ];
        let output = self.docker(&args).await?;
        if !output.status.success() {
            return Err(Self::failure("ps", &output));
        }
        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
    }

    pub fn run_args(&self, spec: &UnitSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--restart".to_string(),
            self.config.restart_policy.clone(),
            "-p".to_string(),
            format!("{0}:{0}", spec.port),
            "--label".to_string(),
            format!("{PORT_LABEL}={}", spec.port),
            "--label".to_string(),
            format!("{UNIT_LABEL}={}", spec.name),
        ];
        if let Some(network) = &self.config.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        for (key, value) in spec.env() {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.config.image.clone());
        args
    }
}

#[async_trait]
impl UnitBackend for DockerBackend {
    fn kind(&self) -> &'static str {
        "docker"
    }

    async fn inspect(&self, name: &str) -> FleetResult<Option<RuntimeInfo>> {
        // name过滤是子串匹配，需要再精确比较
        let units = self.ps(&format!("^/{name}$")).await?;
        Ok(units.into_iter().find(|unit| unit.name == name))
    }

    async fn launch(&self, spec: &UnitSpec) -> FleetResult<()> {
        let output = self.docker(&self.run_args(spec)).await?;
        if !output.status.success() {
            return Err(Self::failure("run", &output));
        }
        info!(unit = %spec.name, port = spec.port, "Container launched");
        Ok(())
    }

    async fn stop(&self, name: &str) -> FleetResult<()> {
        let output = self.docker(&["stop".to_string(), name.to_string()]).await?;
        if output.status.success() || is_missing(&output) {
            Ok(())
        } else {
            Err(Self::failure("stop", &output))
        }
    }

    async fn remove(&self, name: &str) -> FleetResult<()> {
        let output = self
            .docker(&["rm".to_string(), "-f".to_string(), name.to_string()])
            .await?;
        if output.status.success() || is_missing(&output) {
            Ok(())
        } else {
            Err(Self::failure("rm", &output))
        }
    }

    async fn list(&self, prefix: &str) -> FleetResult<Vec<RuntimeInfo>> {
        let units = self.ps(prefix).await?;
        Ok(units
            .into_iter()
            .filter(|unit| unit.name.starts_with(prefix))
            .collect())
    }

    fn attach(&self, _name: &str) -> Option<Arc<WorkerHost>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botfleet_core::models::{WorkerConfig, WorkerType};

    #[test]
    fn test_parse_ps_output() {
        let stdout = r#"{"Names":"bot_ABCDEFGH","State":"running","Labels":"botfleet.port=8443,botfleet.unit=bot_ABCDEFGH","CreatedAt":"2024-05-01 10:00:00 +0000 UTC"}
{"Names":"bot_12345678","State":"exited","Labels":"","CreatedAt":""}
not json
"#;
        let units = parse_ps_output(stdout);
        assert_eq!(units.len(), 2);
        assert!(units[0].active);
        assert_eq!(units[0].port, Some(8443));
        assert!(units[0].created_at.is_some());
        assert!(!units[1].active);
        assert_eq!(units[1].port, None);
        assert_eq!(units[1].state, "exited");
    }

    #[test]
    fn test_run_args_carry_environment_contract() {
        let backend = DockerBackend::new(DockerConfig {
            network: Some("fleet".to_string()),
            ..DockerConfig::default()
        });
        let spec = UnitSpec {
            identity: "123:ABCDEFGH".to_string(),
            worker_type: WorkerType::Echo,
            config: WorkerConfig::new(),
            name: "bot_ABCDEFGH".to_string(),
            port: 8444,
            callback_host: "fleet.example.com".to_string(),
            status_url: "redis://redis:6379/0".to_string(),
        };
        let args = backend.run_args(&spec);
        assert!(args.contains(&"8444:8444".to_string()));
        assert!(args.contains(&"BOTFLEET_PORT=8444".to_string()));
        assert!(args.contains(&"BOTFLEET_WORKER_TYPE=echo".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--network" && w[1] == "fleet"));
        assert_eq!(args.last(), Some(&"botfleet-unit:latest".to_string()));
    }
}
