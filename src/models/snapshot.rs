//! 发现快照与周期统计

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Host, Workload};

/// 一次发现得到的内存快照（持久化之前）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub hosts: Vec<Host>,
    pub workloads: Vec<Workload>,
}

impl Snapshot {
    /// 简单拼接，不做跨数据源去重
    pub fn merge(&mut self, other: Snapshot) {
        self.hosts.extend(other.hosts);
        self.workloads.extend(other.workloads);
    }
}

/// 子资源级别的发现失败（某个命名空间、某个节点）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailure {
    /// 失败的子资源，例如 "node/pve2"、"namespace/default/deployments"
    pub scope: String,
    pub reason: String,
}

impl PartialFailure {
    pub fn new(scope: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            scope: scope.into(),
            reason: reason.to_string(),
        }
    }
}

/// 协调结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub hosts_added: u64,
    pub hosts_updated: u64,
    pub workloads_added: u64,
    pub workloads_updated: u64,
}

/// 单个数据源在一个周期中的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    /// 全部子资源成功
    Ok,
    /// 部分子资源失败，其余实体已纳入快照
    Partial { failures: Vec<PartialFailure> },
    /// 整体失败（认证、连接、超时），本周期不含该数据源的实体
    Unavailable { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: String,
    pub kind: String,
    pub hosts: usize,
    pub workloads: usize,
    #[serde(flatten)]
    pub outcome: SourceOutcome,
}

/// 一次成功提交的同步周期报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub hosts_count: usize,
    pub workloads_count: usize,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub stats: ReconcileStats,
    pub sources: Vec<SourceReport>,
}

impl CycleReport {
    /// 是否有数据源降级（部分失败或不可用）
    pub fn degraded(&self) -> bool {
        self.sources
            .iter()
            .any(|s| !matches!(s.outcome, SourceOutcome::Ok))
    }
}
