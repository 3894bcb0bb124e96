use std::future::Future;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use botfleet_core::models::{
    redact_identity, WorkerConfig, WorkerRecord, WorkerStatus, WorkerType,
};
use botfleet_core::FleetResult;
use botfleet_dispatcher::ControlReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::{ApiError, ApiResult},
    response::{accepted, success},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ControlParams {
    #[serde(default = "default_wait")]
    pub wait: bool,
}

fn default_wait() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub worker_type: Option<WorkerType>,
    pub config: Option<WorkerConfig>,
}

/// Worker列表项，`live` 表示注册表中是否持有可用句柄
#[derive(Debug, Serialize)]
pub struct WorkerSummary {
    pub identity: String,
    pub worker_type: WorkerType,
    pub status: WorkerStatus,
    pub error_message: Option<String>,
    pub webhook_url: Option<String>,
    pub unit_name: Option<String>,
    pub port: Option<u16>,
    pub live: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl WorkerSummary {
    fn new(record: WorkerRecord, live: bool) -> Self {
        Self {
            identity: record.identity,
            worker_type: record.worker_type,
            status: record.status,
            error_message: record.error_message,
            webhook_url: record.webhook_url,
            unit_name: record.unit_name,
            port: record.port,
            live,
            created_at: record.created_at,
            last_activity: record.last_activity,
        }
    }
}

/// 控制操作总是在独立任务中执行，请求被取消（超时、客户端断开）不会中断状态转换；
/// `wait=false` 时立即返回202
async fn run_control<F>(
    operation: &'static str,
    identity: String,
    wait: bool,
    task: F,
) -> ApiResult<Response>
where
    F: Future<Output = FleetResult<ControlReport>> + Send + 'static,
{
    let who = redact_identity(&identity);
    let running = tokio::spawn(async move {
        let result = task.await;
        match &result {
            Ok(report) => info!(
                identity = %who,
                action = report.action.as_str(),
                "{} finished", operation
            ),
            Err(e) => warn!(identity = %who, "{} failed: {}", operation, e),
        }
        result
    });

    if !wait {
        return Ok(accepted(format!("{operation} 已提交")).into_response());
    }

    let report = running
        .await
        .map_err(|e| ApiError::Internal(format!("{operation} 任务异常退出: {e}")))??;
    Ok(success(report).into_response())
}

pub async fn list_workers(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let records = state.context.records.list().await?;
    let registry = &state.context.registry;
    let workers: Vec<WorkerSummary> = records
        .into_iter()
        .map(|record| {
            let live = registry.contains(&record.identity);
            WorkerSummary::new(record, live)
        })
        .collect();
    Ok(success(workers))
}

pub async fn get_worker(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = state.context.controller.status(&identity).await?;
    Ok(success(report))
}

/// 最近一次后台刷新写入的Worker统计
pub async fn get_worker_stats(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let stats = state
        .context
        .store
        .get_state(&identity)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(success(stats))
}

pub async fn start_worker(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Query(params): Query<ControlParams>,
    body: Option<Json<StartRequest>>,
) -> ApiResult<Response> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let existing = state.context.records.get(&identity).await?;

    let worker_type = request
        .worker_type
        .or_else(|| existing.as_ref().map(|record| record.worker_type))
        .ok_or_else(|| ApiError::BadRequest("新Worker必须指定worker_type".to_string()))?;
    let config = request
        .config
        .or_else(|| existing.map(|record| record.config))
        .unwrap_or_default();

    let controller = state.context.controller.clone();
    let id = identity.clone();
    run_control("start", identity, params.wait, async move {
        controller.start(&id, worker_type, config).await
    })
    .await
}

pub async fn stop_worker(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Query(params): Query<ControlParams>,
) -> ApiResult<Response> {
    let controller = state.context.controller.clone();
    let id = identity.clone();
    run_control("stop", identity, params.wait, async move { controller.stop(&id).await }).await
}

pub async fn restart_worker(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Query(params): Query<ControlParams>,
) -> ApiResult<Response> {
    let controller = state.context.controller.clone();
    let id = identity.clone();
    run_control("restart", identity, params.wait, async move {
        controller.restart(&id).await
    })
    .await
}

pub async fn reconcile_worker(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = state.context.controller.reconcile(&identity).await?;
    Ok(success(report))
}

pub async fn reconcile_all(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let reports = state.context.controller.reconcile_all().await?;
    Ok(success(reports))
}
