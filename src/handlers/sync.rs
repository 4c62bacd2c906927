//! 同步触发与状态的 HTTP 处理器

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::{
    error::AppError,
    middleware::AppState,
    models::CycleReport,
    scheduler::{SchedulerStatus, TriggerOrigin},
};

/// 手动触发一个同步周期，等待完成后返回周期报告
///
/// 已有周期运行时按配置的策略拒绝（409）或排队；排队已满或等待超时返回 503。
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CycleReport>, AppError> {
    tracing::info!("Manual sync requested");

    let report = state.scheduler.trigger(TriggerOrigin::Manual).await?;

    Ok(Json(report))
}

#[derive(Serialize)]
pub struct SyncStatusResponse {
    #[serde(flatten)]
    pub status: SchedulerStatus,
}

/// 调度器状态
pub async fn sync_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(SyncStatusResponse {
        status: state.scheduler.status().await,
    })
}
