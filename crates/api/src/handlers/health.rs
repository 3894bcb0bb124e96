use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::routes::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let store = match state.context.store.ping().await {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("unavailable: {e}"),
    };
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "botfleet",
        "version": env!("CARGO_PKG_VERSION"),
        "host": hostname::get().ok().and_then(|h| h.into_string().ok()),
        "backend": state.context.provisioner.backend_kind(),
        "status_store": store,
        "live_workers": state.context.registry.len(),
    }))
}
