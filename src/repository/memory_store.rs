//! 内存存储
//! 与 PostgreSQL 实现同样的事务语义：写入先暂存，提交时一次性可见

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::{InventoryStore, InventoryTx, StoreError};
use crate::models::{Host, HostRecord, Workload, WorkloadRecord};

#[derive(Debug, Default)]
struct MemoryState {
    hosts: HashMap<Uuid, HostRecord>,
    workloads: HashMap<Uuid, WorkloadRecord>,
}

/// 内存库存存储，可注入写入失败
#[derive(Clone, Default)]
pub struct MemoryInventoryStore {
    state: Arc<Mutex<MemoryState>>,
    /// 每个事务允许成功的写入次数，超过后返回错误
    fail_after_writes: Arc<Mutex<Option<usize>>>,
    commit_delay: Arc<Mutex<Option<Duration>>>,
}

impl MemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后开启的事务在成功写入 `n` 次后失败
    pub async fn fail_after_writes(&self, n: usize) {
        *self.fail_after_writes.lock().await = Some(n);
    }

    /// 之后开启的事务在提交前等待 `delay`，模拟慢提交
    pub async fn delay_commit(&self, delay: Duration) {
        *self.commit_delay.lock().await = Some(delay);
    }

    pub async fn hosts(&self) -> Vec<HostRecord> {
        let state = self.state.lock().await;
        let mut hosts: Vec<_> = state.hosts.values().cloned().collect();
        hosts.sort_by(|a, b| a.host.name.cmp(&b.host.name));
        hosts
    }

    pub async fn get_host(&self, id: Uuid) -> Option<HostRecord> {
        self.state.lock().await.hosts.get(&id).cloned()
    }

    pub async fn workloads(&self) -> Vec<WorkloadRecord> {
        let state = self.state.lock().await;
        let mut workloads: Vec<_> = state.workloads.values().cloned().collect();
        workloads.sort_by(|a, b| a.workload.name.cmp(&b.workload.name));
        workloads
    }

    pub async fn get_workload(&self, id: Uuid) -> Option<WorkloadRecord> {
        self.state.lock().await.workloads.get(&id).cloned()
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError> {
        let fail_after = *self.fail_after_writes.lock().await;
        let commit_delay = *self.commit_delay.lock().await;
        Ok(Box::new(MemoryInventoryTx {
            state: self.state.clone(),
            hosts: HashMap::new(),
            workloads: HashMap::new(),
            writes: 0,
            fail_after,
            commit_delay,
        }))
    }
}

/// 暂存的写入；丢弃即回滚
pub struct MemoryInventoryTx {
    state: Arc<Mutex<MemoryState>>,
    hosts: HashMap<Uuid, HostRecord>,
    workloads: HashMap<Uuid, WorkloadRecord>,
    writes: usize,
    fail_after: Option<usize>,
    commit_delay: Option<Duration>,
}

impl MemoryInventoryTx {
    fn check_write(&mut self) -> Result<(), StoreError> {
        if let Some(limit) = self.fail_after {
            if self.writes >= limit {
                return Err(StoreError::Unavailable(format!(
                    "injected failure after {} writes",
                    limit
                )));
            }
        }
        self.writes += 1;
        Ok(())
    }

    async fn host_created_at(&self, id: Uuid) -> Option<DateTime<Utc>> {
        if let Some(staged) = self.hosts.get(&id) {
            return Some(staged.created_at);
        }
        self.state.lock().await.hosts.get(&id).map(|h| h.created_at)
    }

    async fn workload_created_at(&self, id: Uuid) -> Option<DateTime<Utc>> {
        if let Some(staged) = self.workloads.get(&id) {
            return Some(staged.created_at);
        }
        self.state
            .lock()
            .await
            .workloads
            .get(&id)
            .map(|w| w.created_at)
    }
}

#[async_trait]
impl InventoryTx for MemoryInventoryTx {
    async fn host_exists(&mut self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.host_created_at(id).await.is_some())
    }

    async fn insert_host(&mut self, host: &Host, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_write()?;
        self.hosts.insert(
            host.id,
            HostRecord {
                host: host.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn update_host(&mut self, host: &Host, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_write()?;
        let created_at = self
            .host_created_at(host.id)
            .await
            .ok_or_else(|| StoreError::Unavailable(format!("host {} does not exist", host.id)))?;
        self.hosts.insert(
            host.id,
            HostRecord {
                host: host.clone(),
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn workload_exists(&mut self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.workload_created_at(id).await.is_some())
    }

    async fn insert_workload(
        &mut self,
        workload: &Workload,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        self.workloads.insert(
            workload.id,
            WorkloadRecord {
                workload: workload.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn update_workload(
        &mut self,
        workload: &Workload,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let created_at = self.workload_created_at(workload.id).await.ok_or_else(|| {
            StoreError::Unavailable(format!("workload {} does not exist", workload.id))
        })?;
        self.workloads.insert(
            workload.id,
            WorkloadRecord {
                workload: workload.clone(),
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        if let Some(delay) = this.commit_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = this.state.lock().await;
        state.hosts.extend(this.hosts);
        state.workloads.extend(this.workloads);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
