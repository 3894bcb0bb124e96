use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use botfleet_core::FleetError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Fleet(#[from] FleetError),

    #[error("未知的Worker: {0}")]
    UnknownWorker(String),

    #[error("Worker不可用: {0}")]
    Unavailable(String),

    #[error("事件处理失败: {0}")]
    Processing(String),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

fn fleet_status(err: &FleetError) -> StatusCode {
    match err {
        FleetError::WorkerNotFound { .. } => StatusCode::NOT_FOUND,
        FleetError::UnknownWorkerType(_)
        | FleetError::Configuration(_)
        | FleetError::Serialization(_) => StatusCode::BAD_REQUEST,
        FleetError::AlreadyRunning { .. }
        | FleetError::AlreadyStopped { .. }
        | FleetError::InvalidTransition { .. } => StatusCode::CONFLICT,
        FleetError::WorkerUnavailable { .. }
        | FleetError::StatusStore(_)
        | FleetError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
        FleetError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        FleetError::Provisioning(_)
        | FleetError::PortExhausted { .. }
        | FleetError::ContractViolation(_)
        | FleetError::RestartFailed { .. }
        | FleetError::Processing(_)
        | FleetError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Fleet(err) => fleet_status(err),
            ApiError::UnknownWorker(_) | ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Processing(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Fleet(err) => err.kind(),
            ApiError::UnknownWorker(_) => "UNKNOWN_WORKER",
            ApiError::Unavailable(_) => "WORKER_UNAVAILABLE",
            ApiError::Processing(_) => "PROCESSING_ERROR",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("请求失败: {} - {}", status, self);
        }

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use botfleet_core::models::WorkerStatus;
    use tracing_test::traced_test;

    #[test]
    fn test_fleet_error_conversion() {
        let api_error: ApiError = FleetError::WorkerNotFound {
            identity: "tok".to_string(),
        }
        .into();
        assert_eq!(api_error.status(), StatusCode::NOT_FOUND);
        assert_eq!(api_error.error_type(), "WORKER_NOT_FOUND");
    }

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (ApiError::UnknownWorker("tok".to_string()), StatusCode::NOT_FOUND),
            (ApiError::Unavailable("stopped".to_string()), StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::Processing("boom".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::BadRequest("x".to_string()), StatusCode::BAD_REQUEST),
            (
                ApiError::Fleet(FleetError::PortExhausted { base: 1, max: 2 }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::Fleet(FleetError::InvalidTransition {
                    from: WorkerStatus::Stopped,
                    to: WorkerStatus::Running,
                }),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Fleet(FleetError::Timeout("poll".to_string())),
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_display_keeps_fleet_message() {
        let error = ApiError::Fleet(FleetError::Provisioning("docker run failed".to_string()));
        assert!(error.to_string().contains("docker run failed"));
    }

    #[test]
    #[traced_test]
    fn test_server_errors_are_logged() {
        let response = ApiError::Processing("handler exploded".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(logs_contain("handler exploded"));

        let _ = ApiError::BadRequest("quiet".to_string()).into_response();
        assert!(!logs_contain("quiet"));
    }
}
