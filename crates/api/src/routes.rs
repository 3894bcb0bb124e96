use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use botfleet_dispatcher::FleetContext;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::{
    health::health_check,
    metrics::render_metrics,
    units::list_units,
    webhook::receive_event,
    workers::{
        get_worker, get_worker_stats, list_workers, reconcile_all, reconcile_worker,
        restart_worker, start_worker, stop_worker,
    },
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<FleetContext>,
    pub metrics: Option<PrometheusHandle>,
}

/// 创建API路由
pub fn create_routes(state: AppState, metrics_endpoint: &str) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // 上游平台事件入口
        .route("/workers/webhook/{identity}", post(receive_event))
        // Worker管理API
        .route("/api/workers", get(list_workers))
        .route("/api/workers/{identity}", get(get_worker))
        .route("/api/workers/{identity}/stats", get(get_worker_stats))
        .route("/api/workers/{identity}/start", post(start_worker))
        .route("/api/workers/{identity}/stop", post(stop_worker))
        .route("/api/workers/{identity}/restart", post(restart_worker))
        .route("/api/workers/{identity}/reconcile", post(reconcile_worker))
        .route("/api/reconcile", post(reconcile_all))
        // 运行单元审计
        .route("/api/units", get(list_units))
        .route(metrics_endpoint, get(render_metrics))
        .with_state(state)
}
