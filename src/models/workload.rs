//! Workload domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Metadata;

/// 工作负载类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "workload_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkloadType {
    Deployment,
    StatefulSet,
    DaemonSet,
    VirtualMachine,
    Container,
    Pod,
}

/// 工作负载运行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "workload_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Running,
    Stopped,
    Pending,
    Failed,
    Unknown,
}

impl std::fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadStatus::Running => write!(f, "running"),
            WorkloadStatus::Stopped => write!(f, "stopped"),
            WorkloadStatus::Pending => write!(f, "pending"),
            WorkloadStatus::Failed => write!(f, "failed"),
            WorkloadStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// 健康状态，与运行状态相互独立
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "health_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// 数据源产出的规范化工作负载记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Workload {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub workload_type: WorkloadType,
    /// 指向所在主机的弱引用（非外键，同一周期内工作负载可能先于主机出现）
    pub host_id: Option<Uuid>,
    pub status: WorkloadStatus,
    pub health_status: HealthStatus,
    /// Kubernetes 命名空间 / Proxmox 节点名
    pub namespace: Option<String>,
    /// 期望 / 实际形态（副本数、镜像、资源标识等）
    #[sqlx(json)]
    pub spec: Metadata,
    pub last_updated_at: DateTime<Utc>,
    #[sqlx(json)]
    pub metadata: Metadata,
}

/// 已持久化的工作负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkloadRecord {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub workload: Workload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Workload list filters
#[derive(Debug, Default, Deserialize)]
pub struct WorkloadListFilters {
    #[serde(rename = "type")]
    pub workload_type: Option<WorkloadType>,
    pub status: Option<WorkloadStatus>,
    pub health: Option<HealthStatus>,
    pub namespace: Option<String>,
    pub host_id: Option<Uuid>,
    pub search: Option<String>,
}
