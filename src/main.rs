//! 库存服务主入口

use infra_inventory::{
    config::AppConfig,
    db,
    handlers::health,
    middleware::AppState,
    repository::{InventoryRepository, PgInventoryStore},
    routes,
    scheduler::Scheduler,
    services::{Reconciler, SyncService},
    sources, telemetry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("infra-inventory {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 按优先级加载：.env.<INVENTORY_ENV> 或 .env.local > .env
    if let Ok(env) = std::env::var("INVENTORY_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Infra inventory starting...");

    // 3. 数据库连接池 + 迁移
    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!("Database initialized");

    // 4. 数据源、协调器与调度器
    let sources = sources::build_sources(&config.sources)?;
    if sources.is_empty() {
        tracing::warn!("No sources configured, sync cycles will be empty");
    }
    for source in &sources {
        tracing::info!(source = source.name(), kind = %source.kind(), "Source registered");
    }

    let store = Arc::new(PgInventoryStore::new(
        db_pool.clone(),
        config.sync.statement_timeout(),
    ));
    let reconciler = Reconciler::new(store, config.sync.statement_timeout());
    let sync_service = Arc::new(SyncService::new(
        sources,
        reconciler,
        config.sync.source_timeout(),
    ));
    let scheduler = Arc::new(Scheduler::new(sync_service, config.sync.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval_task = scheduler.spawn_interval(shutdown_rx);
    if interval_task.is_none() {
        tracing::info!("Scheduled sync disabled, waiting for manual triggers");
    }

    let app_state = Arc::new(AppState {
        config: config.clone(),
        db: db_pool.clone(),
        scheduler,
        inventory: Arc::new(InventoryRepository::new(db_pool.clone())),
    });

    // 5. 构建路由
    let app = routes::create_router(app_state);

    // 6. 启动服务器
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    // 7. 优雅关闭
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 停止定时同步；正在运行的周期最多等待 graceful_shutdown_timeout_secs
    shutdown_tx.send(true).ok();
    if let Some(task) = interval_task {
        let timeout = Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
        if tokio::time::timeout(timeout, task).await.is_err() {
            tracing::warn!("Scheduled sync did not stop in time, forcing exit");
        }
    }

    db_pool.close().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }
}

/// 打印帮助信息
fn print_help() {
    println!("infra-inventory {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: infra-inventory [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 INVENTORY_ 前缀的环境变量完成，嵌套字段用 __ 分隔");
    println!("  例如 INVENTORY_DATABASE__URL、INVENTORY_SYNC__INTERVAL_MS");
}
