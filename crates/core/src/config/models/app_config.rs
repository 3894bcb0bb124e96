use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    dispatcher::DispatcherConfig,
    provisioner::{ProvisionerConfig, RuntimeBackendKind},
    seed::WorkerSeedConfig,
    status_store::{StatusStoreConfig, StatusStoreKind},
};

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub status_store: StatusStoreConfig,
    pub provisioner: ProvisionerConfig,
    pub dispatcher: DispatcherConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
    pub workers: Vec<WorkerSeedConfig>,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: BOTFLEET_, nested keys separated by `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/botfleet.toml",
                "botfleet.toml",
                "/etc/botfleet/config.toml",
            ];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("BOTFLEET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.status_store
            .validate()
            .context("状态存储配置验证失败")?;
        self.provisioner
            .validate()
            .context("运行单元配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        if self.status_store.backend == StatusStoreKind::Memory
            && self.provisioner.backend != RuntimeBackendKind::InProcess
        {
            return Err(anyhow::anyhow!(
                "memory状态存储只能与in_process运行单元后端一起使用"
            ));
        }

        let mut seen = HashSet::new();
        for seed in &self.workers {
            if seed.identity.trim().is_empty() {
                return Err(anyhow::anyhow!("Worker凭据不能为空"));
            }
            if !seen.insert(seed.identity.as_str()) {
                return Err(anyhow::anyhow!(
                    "Worker凭据重复: {}",
                    crate::models::redact_identity(&seed.identity)
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkerType;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.provisioner.base_port, 8443);
        assert_eq!(config.provisioner.status_timeout_seconds, 30);
        assert_eq!(config.provisioner.name_prefix, "bot_");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [status_store]
            backend = "memory"

            [provisioner]
            backend = "in_process"
            base_port = 9000
            max_port = 9010

            [[workers]]
            identity = "123456:ABCDEF"
            worker_type = "numbers"
            autostart = true
            config = { admin_ids = [1] }
            "#,
        )
        .unwrap();

        assert_eq!(config.status_store.backend, StatusStoreKind::Memory);
        assert_eq!(config.provisioner.backend, RuntimeBackendKind::InProcess);
        assert_eq!(config.provisioner.base_port, 9000);
        assert_eq!(config.provisioner.callback_host, "localhost");
        assert_eq!(config.workers.len(), 1);
        assert_eq!(config.workers[0].worker_type, WorkerType::Numbers);
        assert!(config.workers[0].autostart);
        assert!(config.workers[0].config.contains_key("admin_ids"));
    }

    #[test]
    fn test_unknown_worker_type_rejected_at_validation() {
        let result = AppConfig::from_toml(
            r#"
            [[workers]]
            identity = "tok"
            worker_type = "dice_mmo"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [[workers]]
            identity = "tok"
            worker_type = "echo"

            [[workers]]
            identity = "tok"
            worker_type = "numbers"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_memory_store_requires_in_process_backend() {
        let mut config = AppConfig::default();
        config.status_store.backend = StatusStoreKind::Memory;
        assert!(config.validate().is_err());

        config.provisioner.backend = RuntimeBackendKind::InProcess;
        config.validate().unwrap();
    }

    #[test]
    fn test_port_range_validation() {
        let mut config = AppConfig::default();
        config.provisioner.base_port = 9000;
        config.provisioner.max_port = 8000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [api]
            bind_address = "127.0.0.1:9999"

            [observability]
            log_format = "json"
            "#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.api.bind_address, "127.0.0.1:9999");
        assert_eq!(config.observability.log_format, "json");
        assert_eq!(config.provisioner.base_port, 8443);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/botfleet.toml")).is_err());
    }

    #[test]
    fn test_toml_roundtrip_keeps_sections() {
        let toml = AppConfig::default().to_toml().unwrap();
        assert!(toml.contains("[provisioner]"));
        assert!(toml.contains("[status_store]"));
    }
}
