//! 日志与指标
//! 初始化结构化日志，并登记同步周期相关指标

use crate::config::AppConfig;
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 初始化日志与追踪系统
pub fn init_telemetry(config: &AppConfig) {
    // RUST_LOG 优先于配置
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let log_layer = match config.logging.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
            .boxed(),
        "pretty" => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(log_layer)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.logging.level,
        format = %config.logging.format,
        "Telemetry initialized"
    );
}

/// 登记指标说明
///
/// metrics 0.24 在首次使用时创建指标，这里只补充描述和单位，供安装的 recorder 导出。
pub fn init_metrics() {
    describe_counter!(
        "inventory_sync_cycles_total",
        "Completed sync cycles labelled by result (ok, degraded, failed)"
    );
    describe_counter!(
        "inventory_source_failures_total",
        "Sources that were unavailable or partially failed in a cycle"
    );
    describe_counter!(
        "inventory_entities_written_total",
        "Hosts and workloads inserted or updated by the reconciler"
    );
    describe_histogram!(
        "inventory_sync_duration_seconds",
        Unit::Seconds,
        "Wall time of a sync cycle from discovery to commit"
    );
    describe_counter!("http_requests_total", "HTTP requests by method and status");
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request latency"
    );
    describe_gauge!("inventory_db_pool_size", "Open database connections");
    describe_gauge!("inventory_db_pool_idle", "Idle database connections");

    tracing::debug!("Metrics described");
}
