//! PostgreSQL 存储实现

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use super::store::{InventoryStore, InventoryTx, StoreError};
use crate::models::{Host, Workload};

/// 基于共享连接池的库存存储
#[derive(Clone)]
pub struct PgInventoryStore {
    db: PgPool,
    statement_timeout: Duration,
}

impl PgInventoryStore {
    pub fn new(db: PgPool, statement_timeout: Duration) -> Self {
        Self {
            db,
            statement_timeout,
        }
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError> {
        let mut tx = self.db.begin().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to begin transaction");
            e
        })?;

        // SET 不支持参数绑定，这里只拼接整数
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        Ok(Box::new(PgInventoryTx { tx }))
    }
}

/// 持有事务连接；所有语句都在该连接上执行
pub struct PgInventoryTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InventoryTx for PgInventoryTx {
    async fn host_exists(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM hosts WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_host(&mut self, host: &Host, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO hosts (
                id, name, type, cluster, addresses, status, last_seen_at,
                tags, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            "#,
        )
        .bind(host.id)
        .bind(&host.name)
        .bind(host.host_type)
        .bind(&host.cluster)
        .bind(Json(&host.addresses))
        .bind(host.status)
        .bind(host.last_seen_at)
        .bind(Json(&host.tags))
        .bind(Json(&host.metadata))
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_host(&mut self, host: &Host, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE hosts
            SET
                name = $2,
                type = $3,
                cluster = $4,
                addresses = $5,
                status = $6,
                last_seen_at = $7,
                tags = $8,
                metadata = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(host.id)
        .bind(&host.name)
        .bind(host.host_type)
        .bind(&host.cluster)
        .bind(Json(&host.addresses))
        .bind(host.status)
        .bind(host.last_seen_at)
        .bind(Json(&host.tags))
        .bind(Json(&host.metadata))
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn workload_exists(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM workloads WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_workload(
        &mut self,
        workload: &Workload,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workloads (
                id, name, type, host_id, status, health_status, namespace,
                spec, last_updated_at, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            "#,
        )
        .bind(workload.id)
        .bind(&workload.name)
        .bind(workload.workload_type)
        .bind(workload.host_id)
        .bind(workload.status)
        .bind(workload.health_status)
        .bind(&workload.namespace)
        .bind(Json(&workload.spec))
        .bind(workload.last_updated_at)
        .bind(Json(&workload.metadata))
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_workload(
        &mut self,
        workload: &Workload,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE workloads
            SET
                name = $2,
                type = $3,
                host_id = $4,
                status = $5,
                health_status = $6,
                namespace = $7,
                spec = $8,
                last_updated_at = $9,
                metadata = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(workload.id)
        .bind(&workload.name)
        .bind(workload.workload_type)
        .bind(workload.host_id)
        .bind(workload.status)
        .bind(workload.health_status)
        .bind(&workload.namespace)
        .bind(Json(&workload.spec))
        .bind(workload.last_updated_at)
        .bind(Json(&workload.metadata))
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to commit transaction");
            StoreError::from(e)
        })
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
