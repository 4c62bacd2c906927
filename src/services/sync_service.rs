//! 同步服务
//! 一个同步周期：并发调用所有数据源 → 合并快照 → 协调写入

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use super::reconciler::{ReconcileError, Reconciler};
use crate::models::{CycleReport, Snapshot, SourceOutcome, SourceReport};
use crate::sources::{DiscoveryError, Source};

pub struct SyncService {
    sources: Vec<Arc<dyn Source>>,
    reconciler: Reconciler,
    source_timeout: Duration,
}

impl SyncService {
    pub fn new(
        sources: Vec<Arc<dyn Source>>,
        reconciler: Reconciler,
        source_timeout: Duration,
    ) -> Self {
        Self {
            sources,
            reconciler,
            source_timeout,
        }
    }

    /// 已注册的数据源数量
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// 执行一个完整周期
    ///
    /// 数据源失败只影响该数据源（记录在报告中），持久化失败使整个周期失败。
    #[instrument(skip(self), fields(sources = self.sources.len()))]
    pub async fn run_cycle(&self) -> Result<CycleReport, ReconcileError> {
        let started = Instant::now();

        let discoveries = join_all(self.sources.iter().map(|source| async move {
            let result = tokio::time::timeout(self.source_timeout, source.discover())
                .await
                .unwrap_or(Err(DiscoveryError::Timeout(self.source_timeout)));
            (source, result)
        }))
        .await;

        let mut snapshot = Snapshot::default();
        let mut reports = Vec::with_capacity(discoveries.len());

        for (source, result) in discoveries {
            let name = source.name().to_string();
            let kind = source.kind().to_string();

            let report = match result {
                Ok(discovery) => {
                    let (part, failures) = discovery.into_snapshot();
                    let outcome = if failures.is_empty() {
                        SourceOutcome::Ok
                    } else {
                        for failure in &failures {
                            warn!(
                                source = %name,
                                scope = %failure.scope,
                                reason = %failure.reason,
                                "Partial discovery failure"
                            );
                        }
                        metrics::counter!(
                            "inventory_source_failures_total",
                            "source" => name.clone()
                        )
                        .increment(1);
                        SourceOutcome::Partial { failures }
                    };
                    let report = SourceReport {
                        source: name,
                        kind,
                        hosts: part.hosts.len(),
                        workloads: part.workloads.len(),
                        outcome,
                    };
                    snapshot.merge(part);
                    report
                }
                Err(e) => {
                    error!(source = %name, error = %e, "Source unavailable, skipping this cycle");
                    metrics::counter!("inventory_source_failures_total", "source" => name.clone())
                        .increment(1);
                    SourceReport {
                        source: name,
                        kind,
                        hosts: 0,
                        workloads: 0,
                        outcome: SourceOutcome::Unavailable {
                            error: e.to_string(),
                        },
                    }
                }
            };
            reports.push(report);
        }

        let result = self.reconciler.reconcile(&snapshot).await;
        let elapsed = started.elapsed();
        metrics::histogram!("inventory_sync_duration_seconds").record(elapsed.as_secs_f64());

        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                metrics::counter!("inventory_sync_cycles_total", "result" => "failed").increment(1);
                error!(error = %e, stage = %e.stage(), "Sync cycle failed");
                return Err(e);
            }
        };

        let report = CycleReport {
            hosts_count: snapshot.hosts.len(),
            workloads_count: snapshot.workloads.len(),
            timestamp: Utc::now(),
            duration_ms: elapsed.as_millis() as u64,
            stats,
            sources: reports,
        };

        let result_label = if report.degraded() { "degraded" } else { "ok" };
        metrics::counter!("inventory_sync_cycles_total", "result" => result_label).increment(1);
        info!(
            hosts = report.hosts_count,
            workloads = report.workloads_count,
            duration_ms = report.duration_ms,
            degraded = report.degraded(),
            "Sync cycle completed"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity;
    use crate::models::{
        HealthStatus, Host, HostStatus, HostType, Metadata, PartialFailure, Workload,
        WorkloadStatus, WorkloadType,
    };
    use crate::repository::MemoryInventoryStore;
    use crate::sources::{Discovery, SourceKind};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};

    /// 返回固定结果的数据源
    struct FixedSource {
        name: &'static str,
        result: fn() -> Result<Discovery, DiscoveryError>,
    }

    #[async_trait]
    impl Source for FixedSource {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Custom
        }

        async fn discover(&self) -> Result<Discovery, DiscoveryError> {
            (self.result)()
        }
    }

    struct SlowSource;

    #[async_trait]
    impl Source for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Custom
        }

        async fn discover(&self) -> Result<Discovery, DiscoveryError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Discovery::default())
        }
    }

    fn host(key: &str) -> Host {
        Host {
            id: identity::assign(key),
            name: key.rsplit(':').next().unwrap_or(key).to_string(),
            host_type: HostType::ClusterNode,
            cluster: None,
            addresses: BTreeMap::new(),
            status: HostStatus::Online,
            last_seen_at: Utc::now(),
            tags: BTreeSet::new(),
            metadata: Metadata::new(),
        }
    }

    fn workload(key: &str) -> Workload {
        Workload {
            id: identity::assign(key),
            name: key.rsplit(':').next().unwrap_or(key).to_string(),
            workload_type: WorkloadType::Deployment,
            host_id: None,
            status: WorkloadStatus::Running,
            health_status: HealthStatus::Healthy,
            namespace: Some("default".to_string()),
            spec: Metadata::new(),
            last_updated_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    fn proxmox_like() -> Result<Discovery, DiscoveryError> {
        Ok(Discovery {
            hosts: vec![host("proxmox-node:homelab:pve1"), host("proxmox-node:homelab:pve2")],
            workloads: vec![
                workload("proxmox-qemu:homelab:100"),
                workload("proxmox-lxc:homelab:101"),
            ],
            partial_failures: vec![],
        })
    }

    fn kubernetes_like() -> Result<Discovery, DiscoveryError> {
        Ok(Discovery {
            hosts: vec![host("k8s-node:prod:worker-1")],
            workloads: vec![
                workload("k8s-deployment:prod:default:web"),
                workload("k8s-deployment:prod:default:api"),
                workload("k8s-statefulset:prod:default:db"),
            ],
            partial_failures: vec![],
        })
    }

    fn kubernetes_partial() -> Result<Discovery, DiscoveryError> {
        Ok(Discovery {
            hosts: vec![host("k8s-node:prod:worker-1")],
            workloads: vec![workload("k8s-deployment:prod:default:web")],
            partial_failures: vec![PartialFailure::new(
                "namespace/kube-system/deployments",
                "HTTP 403",
            )],
        })
    }

    fn unreachable() -> Result<Discovery, DiscoveryError> {
        Err(DiscoveryError::Unreachable("connection refused".to_string()))
    }

    fn service(store: &MemoryInventoryStore, sources: Vec<Arc<dyn Source>>) -> SyncService {
        let reconciler = Reconciler::new(Arc::new(store.clone()), Duration::from_secs(5));
        SyncService::new(sources, reconciler, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_multi_source_merge() {
        let store = MemoryInventoryStore::new();
        let service = service(
            &store,
            vec![
                Arc::new(FixedSource {
                    name: "pve",
                    result: proxmox_like,
                }),
                Arc::new(FixedSource {
                    name: "k8s",
                    result: kubernetes_like,
                }),
            ],
        );

        let report = service.run_cycle().await.unwrap();

        assert_eq!(report.hosts_count, 3);
        assert_eq!(report.workloads_count, 5);
        assert_eq!(report.stats.hosts_added, 3);
        assert_eq!(report.stats.workloads_added, 5);
        assert!(!report.degraded());
        assert_eq!(store.hosts().await.len(), 3);
        assert_eq!(store.workloads().await.len(), 5);
    }

    #[tokio::test]
    async fn test_failed_source_does_not_block_others() {
        let store = MemoryInventoryStore::new();
        let service = service(
            &store,
            vec![
                Arc::new(FixedSource {
                    name: "pve",
                    result: unreachable,
                }),
                Arc::new(FixedSource {
                    name: "k8s",
                    result: kubernetes_like,
                }),
            ],
        );

        let report = service.run_cycle().await.unwrap();

        assert!(report.degraded());
        assert_eq!(report.hosts_count, 1);
        assert_eq!(report.workloads_count, 3);

        let pve = report.sources.iter().find(|s| s.source == "pve").unwrap();
        assert!(matches!(pve.outcome, SourceOutcome::Unavailable { .. }));
        let k8s = report.sources.iter().find(|s| s.source == "k8s").unwrap();
        assert_eq!(k8s.outcome, SourceOutcome::Ok);

        assert_eq!(store.hosts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_discovered_entities() {
        let store = MemoryInventoryStore::new();
        let service = service(
            &store,
            vec![Arc::new(FixedSource {
                name: "k8s",
                result: kubernetes_partial,
            })],
        );

        let report = service.run_cycle().await.unwrap();

        assert_eq!(report.workloads_count, 1);
        match &report.sources[0].outcome {
            SourceOutcome::Partial { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].scope, "namespace/kube-system/deployments");
            }
            other => panic!("expected partial outcome, got {:?}", other),
        }
        assert_eq!(store.workloads().await.len(), 1);
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let store = MemoryInventoryStore::new();
        let service = service(
            &store,
            vec![
                Arc::new(SlowSource),
                Arc::new(FixedSource {
                    name: "pve",
                    result: proxmox_like,
                }),
            ],
        );

        let report = service.run_cycle().await.unwrap();

        let slow = report.sources.iter().find(|s| s.source == "slow").unwrap();
        match &slow.outcome {
            SourceOutcome::Unavailable { error } => assert!(error.contains("timed out")),
            other => panic!("expected unavailable outcome, got {:?}", other),
        }
        assert_eq!(report.hosts_count, 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_fails_cycle() {
        let store = MemoryInventoryStore::new();
        store.fail_after_writes(0).await;
        let service = service(
            &store,
            vec![Arc::new(FixedSource {
                name: "pve",
                result: proxmox_like,
            })],
        );

        let err = service.run_cycle().await.unwrap_err();

        assert_eq!(err.stage(), "persistence:insert_host");
        assert!(store.hosts().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_sources_yields_empty_cycle() {
        let store = MemoryInventoryStore::new();
        let report = service(&store, vec![]).run_cycle().await.unwrap();
        assert_eq!(report.hosts_count, 0);
        assert!(report.sources.is_empty());
    }
}
