use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use botfleet_core::models::{redact_identity, DispatchOutcome};
use serde_json::Value;

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

/// 接收上游平台的事件并同步分发给对应Worker
///
/// 200 已处理，404 未知Worker，503 Worker未运行，500 处理失败。
pub async fn receive_event(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Json(event): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let dispatcher = state.context.dispatcher.clone();
    let who = redact_identity(&identity);
    let outcome = tokio::task::spawn_blocking(move || dispatcher.dispatch(&identity, event))
        .await
        .map_err(|e| ApiError::Internal(format!("分发任务异常结束: {e}")))?;

    match outcome {
        DispatchOutcome::Delivered(outcome) => Ok(success(outcome)),
        DispatchOutcome::UnknownWorker => Err(ApiError::UnknownWorker(who)),
        DispatchOutcome::WorkerUnavailable { reason } => {
            Err(ApiError::Unavailable(format!("{who}: {reason}")))
        }
        DispatchOutcome::ProcessingError { message } => Err(ApiError::Processing(message)),
    }
}
