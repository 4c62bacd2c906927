//! 协调器
//! 把快照写入存储：按标识判断插入或更新，整个周期在一个事务内完成

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::models::{ReconcileStats, Snapshot};
use crate::repository::{InventoryStore, InventoryTx, StoreError};

/// 协调错误
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// 任何一次存储调用失败；周期已回滚
    #[error("Persistence failure during {operation}{}: {source}", entity_suffix(.entity_id))]
    Persistence {
        operation: &'static str,
        entity_id: Option<Uuid>,
        #[source]
        source: StoreError,
    },
}

fn entity_suffix(id: &Option<Uuid>) -> String {
    id.map(|id| format!(" ({})", id)).unwrap_or_default()
}

impl ReconcileError {
    /// 失败阶段，例如 "persistence:insert_host"
    pub fn stage(&self) -> String {
        match self {
            ReconcileError::Persistence { operation, .. } => format!("persistence:{}", operation),
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn InventoryStore>,
    statement_timeout: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn InventoryStore>, statement_timeout: Duration) -> Self {
        Self {
            store,
            statement_timeout,
        }
    }

    /// 写入快照
    ///
    /// 不存在的实体插入（`created_at = updated_at = now`），已存在的实体替换全部可变字段并
    /// 刷新 `updated_at`。任何失败都会回滚整个周期，其它读者看不到部分写入。
    #[instrument(
        skip_all,
        fields(hosts = snapshot.hosts.len(), workloads = snapshot.workloads.len())
    )]
    pub async fn reconcile(&self, snapshot: &Snapshot) -> Result<ReconcileStats, ReconcileError> {
        let now = Utc::now();
        let mut stats = ReconcileStats::default();

        let mut tx = self.bounded("begin", None, self.store.begin()).await?;

        if let Err(e) = self.write_all(tx.as_mut(), snapshot, now, &mut stats).await {
            warn!(error = %e, "Reconcile failed, rolling back");
            if let Err(rollback_err) = tx.rollback().await {
                // 连接断开时事务也会被服务端丢弃
                warn!(error = %rollback_err, "Rollback failed");
            }
            return Err(e);
        }

        // 提交只受服务端 statement_timeout 约束；客户端中途放弃会让提交结果不确定
        tx.commit().await.map_err(|source| ReconcileError::Persistence {
            operation: "commit",
            entity_id: None,
            source,
        })?;

        record_writes(&stats);
        info!(
            hosts_added = stats.hosts_added,
            hosts_updated = stats.hosts_updated,
            workloads_added = stats.workloads_added,
            workloads_updated = stats.workloads_updated,
            "Snapshot reconciled"
        );

        Ok(stats)
    }

    async fn write_all(
        &self,
        tx: &mut dyn InventoryTx,
        snapshot: &Snapshot,
        now: chrono::DateTime<Utc>,
        stats: &mut ReconcileStats,
    ) -> Result<(), ReconcileError> {
        for host in &snapshot.hosts {
            let id = Some(host.id);
            if self.bounded("host_exists", id, tx.host_exists(host.id)).await? {
                self.bounded("update_host", id, tx.update_host(host, now)).await?;
                stats.hosts_updated += 1;
            } else {
                self.bounded("insert_host", id, tx.insert_host(host, now)).await?;
                stats.hosts_added += 1;
            }
            debug!(host_id = %host.id, name = %host.name, "Host written");
        }

        for workload in &snapshot.workloads {
            let id = Some(workload.id);
            if self
                .bounded("workload_exists", id, tx.workload_exists(workload.id))
                .await?
            {
                self.bounded("update_workload", id, tx.update_workload(workload, now))
                    .await?;
                stats.workloads_updated += 1;
            } else {
                self.bounded("insert_workload", id, tx.insert_workload(workload, now))
                    .await?;
                stats.workloads_added += 1;
            }
            debug!(workload_id = %workload.id, name = %workload.name, "Workload written");
        }

        Ok(())
    }

    /// 给单次存储调用加上超时，并把错误标注为对应阶段
    async fn bounded<T, F>(
        &self,
        operation: &'static str,
        entity_id: Option<Uuid>,
        call: F,
    ) -> Result<T, ReconcileError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let result = match tokio::time::timeout(self.statement_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.statement_timeout)),
        };

        result.map_err(|source| ReconcileError::Persistence {
            operation,
            entity_id,
            source,
        })
    }
}

fn record_writes(stats: &ReconcileStats) {
    let writes = [
        ("host", "insert", stats.hosts_added),
        ("host", "update", stats.hosts_updated),
        ("workload", "insert", stats.workloads_added),
        ("workload", "update", stats.workloads_updated),
    ];
    for (kind, op, count) in writes {
        if count > 0 {
            metrics::counter!("inventory_entities_written_total", "kind" => kind, "op" => op)
                .increment(count);
        }
    }
}
