//! Inventory repository (库存读路径)

use crate::{error::AppError, models::*};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

const HOST_COLUMNS: &str = "SELECT id, name, type, cluster, addresses, status, last_seen_at, \
     tags, metadata, created_at, updated_at FROM hosts WHERE 1=1";

const WORKLOAD_COLUMNS: &str = "SELECT id, name, type, host_id, status, health_status, namespace, \
     spec, last_updated_at, metadata, created_at, updated_at FROM workloads WHERE 1=1";

pub struct InventoryRepository {
    db: PgPool,
}

impl InventoryRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    // ==================== Hosts ====================

    /// 获取主机
    pub async fn get_host(&self, id: Uuid) -> Result<Option<HostRecord>, AppError> {
        let mut query = QueryBuilder::<Postgres>::new(HOST_COLUMNS);
        query.push(" AND id = ").push_bind(id);

        let host = query
            .build_query_as::<HostRecord>()
            .fetch_optional(&self.db)
            .await?;

        Ok(host)
    }

    /// 列出主机
    pub async fn list_hosts(
        &self,
        filters: &HostListFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<HostRecord>, AppError> {
        let mut query = QueryBuilder::<Postgres>::new(HOST_COLUMNS);
        push_host_filters(&mut query, filters);
        query
            .push(" ORDER BY cluster NULLS LAST, name LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let hosts = query
            .build_query_as::<HostRecord>()
            .fetch_all(&self.db)
            .await?;

        Ok(hosts)
    }

    /// 统计主机数量
    pub async fn count_hosts(&self, filters: &HostListFilters) -> Result<i64, AppError> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM hosts WHERE 1=1");
        push_host_filters(&mut query, filters);

        let (count,): (i64,) = query.build_query_as().fetch_one(&self.db).await?;
        Ok(count)
    }

    // ==================== Workloads ====================

    /// 获取工作负载
    pub async fn get_workload(&self, id: Uuid) -> Result<Option<WorkloadRecord>, AppError> {
        let mut query = QueryBuilder::<Postgres>::new(WORKLOAD_COLUMNS);
        query.push(" AND id = ").push_bind(id);

        let workload = query
            .build_query_as::<WorkloadRecord>()
            .fetch_optional(&self.db)
            .await?;

        Ok(workload)
    }

    /// 列出工作负载
    pub async fn list_workloads(
        &self,
        filters: &WorkloadListFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkloadRecord>, AppError> {
        let mut query = QueryBuilder::<Postgres>::new(WORKLOAD_COLUMNS);
        push_workload_filters(&mut query, filters);
        query
            .push(" ORDER BY namespace NULLS LAST, name LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let workloads = query
            .build_query_as::<WorkloadRecord>()
            .fetch_all(&self.db)
            .await?;

        Ok(workloads)
    }

    /// 统计工作负载数量
    pub async fn count_workloads(&self, filters: &WorkloadListFilters) -> Result<i64, AppError> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM workloads WHERE 1=1");
        push_workload_filters(&mut query, filters);

        let (count,): (i64,) = query.build_query_as().fetch_one(&self.db).await?;
        Ok(count)
    }
}

fn push_host_filters(query: &mut QueryBuilder<'_, Postgres>, filters: &HostListFilters) {
    if let Some(host_type) = filters.host_type {
        query.push(" AND type = ").push_bind(host_type);
    }
    if let Some(status) = filters.status {
        query.push(" AND status = ").push_bind(status);
    }
    if let Some(cluster) = &filters.cluster {
        query.push(" AND cluster = ").push_bind(cluster.clone());
    }
    if let Some(search) = &filters.search {
        query.push(" AND name ILIKE ").push_bind(format!("%{}%", search));
    }
    if let Some(stale_secs) = filters.stale_secs {
        query
            .push(" AND last_seen_at < NOW() - make_interval(secs => ")
            .push_bind(stale_secs as f64)
            .push(")");
    }
}

fn push_workload_filters(query: &mut QueryBuilder<'_, Postgres>, filters: &WorkloadListFilters) {
    if let Some(workload_type) = filters.workload_type {
        query.push(" AND type = ").push_bind(workload_type);
    }
    if let Some(status) = filters.status {
        query.push(" AND status = ").push_bind(status);
    }
    if let Some(health) = filters.health {
        query.push(" AND health_status = ").push_bind(health);
    }
    if let Some(namespace) = &filters.namespace {
        query.push(" AND namespace = ").push_bind(namespace.clone());
    }
    if let Some(host_id) = filters.host_id {
        query.push(" AND host_id = ").push_bind(host_id);
    }
    if let Some(search) = &filters.search {
        query.push(" AND name ILIKE ").push_bind(format!("%{}%", search));
    }
}
