//! # Botfleet API
//!
//! 编排核心的HTTP入口：接收上游平台的Webhook事件，并提供Worker生命周期管理接口。
//!
//! ```text
//! POST /workers/webhook/{identity}  ──spawn_blocking──→ EventDispatcher::dispatch
//!                                                         200 / 404 / 503 / 500
//! POST /api/workers/{identity}/start|stop|restart|reconcile[?wait=false]
//!                                   ──→ LifecycleController     200 / 202
//! GET  /api/workers, /api/workers/{identity}[/stats], /api/units, /health
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use botfleet_core::config::ApiConfig;
use botfleet_dispatcher::FleetContext;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, timeout_layer, trace_layer};
use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(
    context: Arc<FleetContext>,
    api_config: &ApiConfig,
    metrics: Option<PrometheusHandle>,
    metrics_endpoint: &str,
) -> Router {
    let state = AppState { context, metrics };
    let router = create_routes(state, metrics_endpoint).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(timeout_layer(api_config.request_timeout_seconds))
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if api_config.cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    }
}
