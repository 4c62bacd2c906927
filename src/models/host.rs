//! Host domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::Metadata;

/// 主机类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "host_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HostType {
    /// 集群节点（Proxmox 节点、Kubernetes 节点）
    ClusterNode,
    /// 虚拟机
    VirtualMachine,
    /// 容器宿主
    ContainerHost,
    /// 物理机
    BareMetal,
}

/// 主机状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "host_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Online,
    Offline,
    Degraded,
    Unknown,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostStatus::Online => write!(f, "online"),
            HostStatus::Offline => write!(f, "offline"),
            HostStatus::Degraded => write!(f, "degraded"),
            HostStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// 数据源产出的规范化主机记录
///
/// `id` 由数据源通过 [`crate::identity::assign`] 从自然键派生，
/// 协调器从不自行计算标识。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Host {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub host_type: HostType,
    pub cluster: Option<String>,
    /// 命名地址表，例如 "lan" / "public"
    #[sqlx(json)]
    pub addresses: BTreeMap<String, Option<String>>,
    pub status: HostStatus,
    /// 最近一次观测到该主机的发现时刻
    pub last_seen_at: DateTime<Utc>,
    #[sqlx(json)]
    pub tags: BTreeSet<String>,
    #[sqlx(json)]
    pub metadata: Metadata,
}

/// 已持久化的主机（带写入时间戳）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HostRecord {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub host: Host,
    /// 只写一次
    pub created_at: DateTime<Utc>,
    /// 每次写入都会更新
    pub updated_at: DateTime<Utc>,
}

/// Host list filters
#[derive(Debug, Default, Deserialize)]
pub struct HostListFilters {
    #[serde(rename = "type")]
    pub host_type: Option<HostType>,
    pub status: Option<HostStatus>,
    pub cluster: Option<String>,
    /// Search in name
    pub search: Option<String>,
    /// 只返回超过该秒数未被观测到的主机
    pub stale_secs: Option<i64>,
}
