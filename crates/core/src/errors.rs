use thiserror::Error;

use crate::models::WorkerStatus;

/// Bot编排系统错误类型定义
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Worker已在运行: {identity}")]
    AlreadyRunning { identity: String },

    #[error("Worker已停止: {identity}")]
    AlreadyStopped { identity: String },

    #[error("运行单元创建失败: {0}")]
    Provisioning(String),

    #[error("端口已耗尽: {base}..={max} 范围内没有可用端口")]
    PortExhausted { base: u16, max: u16 },

    #[error("Worker不可用: {identity}")]
    WorkerUnavailable { identity: String },

    #[error("事件处理失败: {0}")]
    Processing(String),

    #[error("Worker契约违规: {0}")]
    ContractViolation(String),

    #[error("Worker未找到: {identity}")]
    WorkerNotFound { identity: String },

    #[error("未知的Worker类型: {0}")]
    UnknownWorkerType(String),

    #[error("非法的状态转换: {from} -> {to}")]
    InvalidTransition { from: WorkerStatus, to: WorkerStatus },

    #[error("重启失败: stop: {stop}; start: {start}")]
    RestartFailed { stop: String, start: String },

    #[error("状态存储错误: {0}")]
    StatusStore(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl FleetError {
    /// 幂等空操作（不是真正的失败）
    pub fn is_idempotent_noop(&self) -> bool {
        matches!(
            self,
            FleetError::AlreadyRunning { .. } | FleetError::AlreadyStopped { .. }
        )
    }

    /// 错误类型代码，供API和状态记录使用
    pub fn kind(&self) -> &'static str {
        match self {
            FleetError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            FleetError::AlreadyStopped { .. } => "ALREADY_STOPPED",
            FleetError::Provisioning(_) => "PROVISIONING_ERROR",
            FleetError::PortExhausted { .. } => "PROVISIONING_ERROR",
            FleetError::WorkerUnavailable { .. } => "WORKER_UNAVAILABLE",
            FleetError::Processing(_) => "PROCESSING_ERROR",
            FleetError::ContractViolation(_) => "CONTRACT_VIOLATION",
            FleetError::WorkerNotFound { .. } => "WORKER_NOT_FOUND",
            FleetError::UnknownWorkerType(_) => "UNKNOWN_WORKER_TYPE",
            FleetError::InvalidTransition { .. } => "INVALID_TRANSITION",
            FleetError::RestartFailed { .. } => "RESTART_FAILED",
            FleetError::StatusStore(_) => "STATUS_STORE_ERROR",
            FleetError::Serialization(_) => "SERIALIZATION_ERROR",
            FleetError::Configuration(_) => "CONFIGURATION_ERROR",
            FleetError::Network(_) => "NETWORK_ERROR",
            FleetError::Timeout(_) => "TIMEOUT",
            FleetError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type FleetResult<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_variants() {
        assert!(FleetError::AlreadyRunning {
            identity: "tok".to_string()
        }
        .is_idempotent_noop());
        assert!(FleetError::AlreadyStopped {
            identity: "tok".to_string()
        }
        .is_idempotent_noop());
        assert!(!FleetError::Provisioning("boom".to_string()).is_idempotent_noop());
    }

    #[test]
    fn test_port_exhausted_is_provisioning_kind() {
        let err = FleetError::PortExhausted {
            base: 8443,
            max: 8444,
        };
        assert_eq!(err.kind(), "PROVISIONING_ERROR");
        assert!(err.to_string().contains("8443"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: FleetError = json_err.into();
        assert!(matches!(err, FleetError::Serialization(_)));
    }
}
