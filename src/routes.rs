//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers, middleware::AppState};

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 探针与指标
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::metrics::metrics_export));

    let api_routes = Router::new()
        // 同步
        .route("/api/v1/sync", post(handlers::sync::trigger_sync))
        .route("/api/v1/sync/status", get(handlers::sync::sync_status))
        // 主机
        .route("/api/v1/hosts", get(handlers::inventory::list_hosts))
        .route("/api/v1/hosts/{id}", get(handlers::inventory::get_host))
        // 工作负载
        .route("/api/v1/workloads", get(handlers::inventory::list_workloads))
        .route("/api/v1/workloads/{id}", get(handlers::inventory::get_workload));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
