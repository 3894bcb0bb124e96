use std::time::Duration;

use axum::{
    extract::Request,
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug, info};

pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    // Webhook路径中带有凭据，日志里只保留前缀
    let path = redact_path(request.uri().path());
    let start = std::time::Instant::now();

    debug!("开始处理请求: {} {}", method, path);

    let response = next.run(request).await;
    let duration = start.elapsed();

    info!(
        "完成请求处理: {} {} - 状态: {} - 耗时: {:?}",
        method,
        path,
        response.status(),
        duration
    );

    response
}

fn redact_path(path: &str) -> String {
    const WEBHOOK_PREFIX: &str = "/workers/webhook/";
    const WORKER_PREFIX: &str = "/api/workers/";
    for prefix in [WEBHOOK_PREFIX, WORKER_PREFIX] {
        if let Some(rest) = path.strip_prefix(prefix) {
            let (identity, tail) = rest.split_once('/').unwrap_or((rest, ""));
            let redacted = botfleet_core::models::redact_identity(identity);
            return if tail.is_empty() {
                format!("{prefix}{redacted}")
            } else {
                format!("{prefix}{redacted}/{tail}")
            };
        }
    }
    path.to_string()
}

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

pub fn trace_layer(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
{
    TraceLayer::new_for_http()
}

/// 超时只结束HTTP请求，控制操作本身在后台任务中继续执行
pub fn timeout_layer(seconds: u64) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path() {
        assert_eq!(
            redact_path("/workers/webhook/123456:ABCDEFGHIJKL"),
            "/workers/webhook/…EFGHIJKL"
        );
        assert_eq!(
            redact_path("/api/workers/123456:ABCDEFGHIJKL/stop"),
            "/api/workers/…EFGHIJKL/stop"
        );
        assert_eq!(redact_path("/api/units"), "/api/units");
    }
}
