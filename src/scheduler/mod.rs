//! 同步调度
//! 定时触发与手动触发共用同一个周期锁，保证同一时刻最多只有一个同步周期在运行

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::models::CycleReport;
use crate::services::{ReconcileError, SyncService};

/// 周期运行中收到新触发时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// 立即拒绝（默认）
    #[default]
    Reject,
    /// 等待当前周期结束后再运行，受 queue_timeout 与 queue_max_length 约束
    Queue,
}

/// 触发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrigin {
    Interval,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
}

/// 调度错误
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("A sync cycle is already running")]
    Busy,

    #[error("Sync queue is full (max: {max_length})")]
    QueueFull { max_length: usize },

    #[error("Timed out after {0:?} waiting for the running sync cycle")]
    QueueTimeout(Duration),

    #[error(transparent)]
    Cycle(#[from] ReconcileError),

    /// 周期任务异常退出
    #[error("Sync cycle task ended abnormally: {0}")]
    Interrupted(String),
}

/// 排队名额，释放时（包括等待方被取消）归还
struct QueueSlot<'a>(&'a AtomicUsize);

impl<'a> QueueSlot<'a> {
    fn enter(queued: &'a AtomicUsize, max_length: usize) -> Option<Self> {
        if queued.fetch_add(1, Ordering::SeqCst) >= max_length {
            queued.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self(queued))
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 调度器状态快照
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub busy_policy: BusyPolicy,
    /// None 表示未启用定时同步
    pub interval_ms: Option<u64>,
    pub sources: usize,
    pub queued: usize,
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub last_trigger: Option<TriggerOrigin>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_report: Option<CycleReport>,
    pub last_error: Option<String>,
}

pub struct Scheduler {
    sync: Arc<SyncService>,
    config: SyncConfig,
    /// 周期锁：单许可信号量
    cycle: Arc<Semaphore>,
    queued: AtomicUsize,
    status: RwLock<SchedulerStatus>,
}

impl Scheduler {
    pub fn new(sync: Arc<SyncService>, config: SyncConfig) -> Self {
        let status = SchedulerStatus {
            state: SchedulerState::Idle,
            busy_policy: config.busy_policy,
            interval_ms: config.interval().map(|d| d.as_millis() as u64),
            sources: sync.source_count(),
            queued: 0,
            cycles_succeeded: 0,
            cycles_failed: 0,
            last_trigger: None,
            last_started_at: None,
            last_finished_at: None,
            last_report: None,
            last_error: None,
        };

        Self {
            sync,
            config,
            cycle: Arc::new(Semaphore::new(1)),
            queued: AtomicUsize::new(0),
            status: RwLock::new(status),
        }
    }

    /// 当前状态
    pub async fn status(&self) -> SchedulerStatus {
        let mut status = self.status.read().await.clone();
        status.queued = self.queued.load(Ordering::SeqCst);
        status
    }

    /// 触发一个同步周期并等待其完成
    ///
    /// 周期在独立任务中运行，调用方被取消（例如 HTTP 客户端断开）时周期照常完成并记录状态。
    pub async fn trigger(
        self: &Arc<Self>,
        origin: TriggerOrigin,
    ) -> Result<CycleReport, SchedulerError> {
        let permit = self.acquire().await?;

        let scheduler = Arc::clone(self);
        let cycle = tokio::spawn(async move { scheduler.run(origin, permit).await });

        match cycle.await {
            Ok(result) => result,
            Err(e) => {
                let mut status = self.status.write().await;
                status.state = SchedulerState::Idle;
                status.last_finished_at = Some(Utc::now());
                status.cycles_failed += 1;
                status.last_error = Some(e.to_string());
                Err(SchedulerError::Interrupted(e.to_string()))
            }
        }
    }

    /// 持有周期锁运行一个周期；许可在周期结束后释放
    async fn run(
        &self,
        origin: TriggerOrigin,
        _permit: OwnedSemaphorePermit,
    ) -> Result<CycleReport, SchedulerError> {
        {
            let mut status = self.status.write().await;
            status.state = SchedulerState::Running;
            status.last_trigger = Some(origin);
            status.last_started_at = Some(Utc::now());
        }
        debug!(origin = ?origin, "Sync cycle started");

        let result = self.sync.run_cycle().await;

        let mut status = self.status.write().await;
        status.state = SchedulerState::Idle;
        status.last_finished_at = Some(Utc::now());
        match result {
            Ok(report) => {
                status.cycles_succeeded += 1;
                status.last_error = None;
                status.last_report = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                status.cycles_failed += 1;
                status.last_error = Some(e.to_string());
                Err(SchedulerError::Cycle(e))
            }
        }
    }

    /// 按策略获取周期锁
    async fn acquire(&self) -> Result<OwnedSemaphorePermit, SchedulerError> {
        if let Ok(permit) = self.cycle.clone().try_acquire_owned() {
            return Ok(permit);
        }

        match self.config.busy_policy {
            BusyPolicy::Reject => Err(SchedulerError::Busy),
            BusyPolicy::Queue => {
                let max_length = self.config.queue_max_length;
                let _slot = QueueSlot::enter(&self.queued, max_length)
                    .ok_or(SchedulerError::QueueFull { max_length })?;

                let timeout = self.config.queue_timeout();
                match tokio::time::timeout(timeout, self.cycle.clone().acquire_owned()).await {
                    Ok(Ok(permit)) => Ok(permit),
                    // 信号量从不关闭
                    Ok(Err(_)) => Err(SchedulerError::Busy),
                    Err(_) => Err(SchedulerError::QueueTimeout(timeout)),
                }
            }
        }
    }

    /// 启动定时同步任务；未配置间隔时返回 None
    ///
    /// 收到关闭信号后退出；正在运行的周期会先完成。
    pub fn spawn_interval(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let period = self.config.interval()?;
        let scheduler = Arc::clone(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = period.as_millis() as u64, "Scheduled sync started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match scheduler.trigger(TriggerOrigin::Interval).await {
                            Ok(_) => {}
                            Err(SchedulerError::Busy) => {
                                info!("Sync cycle already running, skipping scheduled tick");
                            }
                            Err(e) => warn!(error = %e, "Scheduled sync cycle failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Scheduled sync stopped");
        }))
    }
}
