use axum::extract::State;
use axum::response::IntoResponse;

use crate::{error::ApiResult, response::success, routes::AppState};

/// 后端中实际存在的运行单元，不经过状态存储
pub async fn list_units(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let units = state.context.provisioner.list().await?;
    Ok(success(units))
}
