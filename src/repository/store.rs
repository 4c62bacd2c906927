//! 存储契约
//! 协调器只依赖这里的 trait；一个同步周期的全部写入都经过同一个事务句柄

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::models::{Host, Workload};

/// 存储层错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Statement timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// 支持事务的库存存储
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// 开启事务；未提交的写入对其它读者不可见
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError>;
}

/// 一个进行中的事务
///
/// 未调用 [`InventoryTx::commit`] 就被丢弃时，写入全部回滚。
#[async_trait]
pub trait InventoryTx: Send {
    async fn host_exists(&mut self, id: Uuid) -> Result<bool, StoreError>;

    /// 首次写入：`created_at = updated_at = now`
    async fn insert_host(&mut self, host: &Host, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// 替换全部可变字段，`updated_at = now`，`created_at` 不变
    async fn update_host(&mut self, host: &Host, now: DateTime<Utc>) -> Result<(), StoreError>;

    async fn workload_exists(&mut self, id: Uuid) -> Result<bool, StoreError>;

    async fn insert_workload(
        &mut self,
        workload: &Workload,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn update_workload(
        &mut self,
        workload: &Workload,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
