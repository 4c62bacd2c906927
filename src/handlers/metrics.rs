//! 指标处理器
//! 提供 /metrics 端点（JSON 摘要）

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::middleware::AppState;

/// 指标响应
#[derive(Serialize)]
pub struct MetricsResponse {
    pub sync_cycles_succeeded: u64,
    pub sync_cycles_failed: u64,
    pub sync_queued: usize,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_duration_ms: Option<u64>,
    pub last_cycle_degraded: Option<bool>,
    pub db_pool_size: u32,
    pub db_pool_idle: u32,
    pub process_uptime_secs: u64,
}

/// 指标暴露端点
pub async fn metrics_export(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    crate::db::record_pool_metrics(&state.db);
    let status = state.scheduler.status().await;
    let last = status.last_report.as_ref();

    Json(MetricsResponse {
        sync_cycles_succeeded: status.cycles_succeeded,
        sync_cycles_failed: status.cycles_failed,
        sync_queued: status.queued,
        last_cycle_at: last.map(|r| r.timestamp),
        last_cycle_duration_ms: last.map(|r| r.duration_ms),
        last_cycle_degraded: last.map(|r| r.degraded()),
        db_pool_size: state.db.size(),
        db_pool_idle: state.db.num_idle() as u32,
        process_uptime_secs: crate::handlers::health::get_uptime(),
    })
}
