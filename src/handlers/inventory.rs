//! 库存查询的 HTTP 处理器

use crate::{error::AppError, middleware::AppState, models::*};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl Pagination {
    fn validate(&self) -> Result<(), AppError> {
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(AppError::BadRequest(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }
        if self.offset < 0 {
            return Err(AppError::BadRequest("offset must be >= 0".to_string()));
        }
        Ok(())
    }
}

// ==================== Hosts ====================

/// 列出主机
///
/// `stale_secs` 只筛选超过该秒数未被发现的主机，不修改任何记录。
pub async fn list_hosts(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<HostListFilters>,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    page.validate()?;
    if matches!(filters.stale_secs, Some(secs) if secs < 0) {
        return Err(AppError::BadRequest("stale_secs must be >= 0".to_string()));
    }

    let hosts = state
        .inventory
        .list_hosts(&filters, page.limit, page.offset)
        .await?;
    let total = state.inventory.count_hosts(&filters).await?;

    Ok(Json(json!({
        "hosts": hosts,
        "count": hosts.len(),
        "total": total,
        "limit": page.limit,
        "offset": page.offset
    })))
}

/// 获取主机详情
pub async fn get_host(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let host = state
        .inventory
        .get_host(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("host {}", id)))?;

    Ok(Json(host))
}

// ==================== Workloads ====================

/// 列出工作负载
pub async fn list_workloads(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<WorkloadListFilters>,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    page.validate()?;

    let workloads = state
        .inventory
        .list_workloads(&filters, page.limit, page.offset)
        .await?;
    let total = state.inventory.count_workloads(&filters).await?;

    Ok(Json(json!({
        "workloads": workloads,
        "count": workloads.len(),
        "total": total,
        "limit": page.limit,
        "offset": page.offset
    })))
}

/// 获取工作负载详情
pub async fn get_workload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let workload = state
        .inventory
        .get_workload(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workload {}", id)))?;

    Ok(Json(workload))
}
