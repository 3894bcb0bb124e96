use serde::{Deserialize, Serialize};

/// 运行单元后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeBackendKind {
    /// 每个Worker一个docker容器
    Docker,
    /// 每个Worker一个本地子进程
    Process,
    /// 每个Worker一个控制进程内的专属调度线程
    InProcess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    pub backend: RuntimeBackendKind,
    pub base_port: u16,
    pub max_port: u16,
    pub name_prefix: String,
    /// 对外公布的Webhook回调主机
    pub callback_host: String,
    /// 控制进程访问运行单元端口时使用的地址
    pub unit_host: String,
    pub status_timeout_seconds: u64,
    pub status_poll_interval_ms: u64,
    pub docker: DockerConfig,
    pub process: ProcessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub binary: String,
    pub image: String,
    pub network: Option<String>,
    pub restart_policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// 为空时使用当前可执行文件
    pub program: Option<String>,
    pub args: Vec<String>,
    pub stop_grace_seconds: u64,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            backend: RuntimeBackendKind::Process,
            base_port: 8443,
            max_port: 9443,
            name_prefix: "bot_".to_string(),
            callback_host: "localhost".to_string(),
            unit_host: "127.0.0.1".to_string(),
            status_timeout_seconds: 30,
            status_poll_interval_ms: 1000,
            docker: DockerConfig::default(),
            process: ProcessConfig::default(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: vec!["unit".to_string()],
            stop_grace_seconds: 10,
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            image: "botfleet-unit:latest".to_string(),
            network: None,
            restart_policy: "unless-stopped".to_string(),
        }
    }
}

impl ProvisionerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_port == 0 {
            return Err(anyhow::anyhow!("基准端口必须大于0"));
        }
        if self.max_port < self.base_port {
            return Err(anyhow::anyhow!(
                "最大端口 {} 小于基准端口 {}",
                self.max_port,
                self.base_port
            ));
        }
        if self.name_prefix.is_empty() {
            return Err(anyhow::anyhow!("运行单元名称前缀不能为空"));
        }
        if !self
            .name_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(anyhow::anyhow!("运行单元名称前缀格式无效: {}", self.name_prefix));
        }
        if self.callback_host.is_empty() {
            return Err(anyhow::anyhow!("回调主机不能为空"));
        }
        if self.unit_host.is_empty() {
            return Err(anyhow::anyhow!("运行单元访问地址不能为空"));
        }
        if self.status_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("状态轮询间隔必须大于0"));
        }
        if self.backend == RuntimeBackendKind::Docker && self.docker.image.is_empty() {
            return Err(anyhow::anyhow!("docker后端必须配置镜像"));
        }
        Ok(())
    }
}
