//! 端到端同步场景测试
//! 真实的数据源实现（对接 wiremock）+ 协调器 + 内存存储

use infra_inventory::{
    config::ProxmoxSourceConfig,
    identity,
    models::{HostStatus, SourceOutcome},
    repository::MemoryInventoryStore,
    services::{Reconciler, SyncService},
    sources::{ProxmoxSource, Source},
};
use secrecy::Secret;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

mod common;
use common::StaticSource;

fn proxmox_source(api_url: &str) -> Arc<dyn Source> {
    let config = ProxmoxSourceConfig {
        name: "pve".to_string(),
        api_url: api_url.to_string(),
        token_id: "root@pam!inventory".to_string(),
        token_secret: Secret::new("s3cret".to_string()),
        cluster: "homelab".to_string(),
        insecure_tls: false,
    };
    Arc::new(ProxmoxSource::from_config(&config).unwrap())
}

fn sync_service(store: &MemoryInventoryStore, sources: Vec<Arc<dyn Source>>) -> SyncService {
    let reconciler = Reconciler::new(Arc::new(store.clone()), Duration::from_secs(5));
    SyncService::new(sources, reconciler, Duration::from_secs(5))
}

/// 挂载单节点集群；`node_status` 与 `net0` 由场景决定
async fn mount_cluster(server: &MockServer, node_status: &str, net0: &str) {
    server.reset().await;

    let routes = [
        (
            "/api2/json/nodes",
            json!({"data": [{"node": "pve", "status": node_status}]}),
        ),
        (
            "/api2/json/cluster/status",
            json!({"data": [{"type": "node", "name": "pve", "ip": "192.168.1.2"}]}),
        ),
        ("/api2/json/nodes/pve/qemu", json!({"data": []})),
        (
            "/api2/json/nodes/pve/lxc",
            json!({"data": [{"vmid": 101, "name": "dns", "status": "running"}]}),
        ),
        (
            "/api2/json/nodes/pve/lxc/101/config",
            json!({"data": {"net0": net0}}),
        ),
    ];

    for (route, body) in routes {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_new_host_appears_with_derived_id() {
    let server = MockServer::start().await;
    mount_cluster(&server, "online", "name=eth0,ip=192.168.1.53/24").await;
    let store = MemoryInventoryStore::new();

    let report = sync_service(&store, vec![proxmox_source(&server.uri())])
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report.stats.hosts_added, 1);
    let id = identity::assign("proxmox-node:homelab:pve");
    let stored = store.get_host(id).await.unwrap();
    assert_eq!(stored.host.name, "pve");
    assert_eq!(stored.host.status, HostStatus::Online);
    assert_eq!(stored.created_at, stored.updated_at);
}

#[tokio::test]
async fn test_node_going_offline_flips_status() {
    let server = MockServer::start().await;
    let store = MemoryInventoryStore::new();
    let service = sync_service(&store, vec![proxmox_source(&server.uri())]);
    let id = identity::assign("proxmox-node:homelab:pve");

    mount_cluster(&server, "online", "name=eth0,ip=dhcp").await;
    service.run_cycle().await.unwrap();
    let before = store.get_host(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    mount_cluster(&server, "offline", "name=eth0,ip=dhcp").await;
    let report = service.run_cycle().await.unwrap();

    assert_eq!(report.stats.hosts_added, 0);
    assert_eq!(report.stats.hosts_updated, 1);
    let after = store.get_host(id).await.unwrap();
    assert_eq!(after.host.status, HostStatus::Offline);
    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at > before.updated_at);
    assert_eq!(store.hosts().await.len(), 1);
}

#[tokio::test]
async fn test_address_change_keeps_container_identity() {
    let server = MockServer::start().await;
    let store = MemoryInventoryStore::new();
    let service = sync_service(&store, vec![proxmox_source(&server.uri())]);
    let id = identity::assign("proxmox-lxc:homelab:101");

    mount_cluster(&server, "online", "name=eth0,ip=192.168.1.53/24").await;
    service.run_cycle().await.unwrap();

    mount_cluster(&server, "online", "name=eth0,ip=dhcp").await;
    let report = service.run_cycle().await.unwrap();

    assert_eq!(report.stats.workloads_added, 0);
    assert_eq!(report.stats.workloads_updated, 1);
    let workloads = store.workloads().await;
    assert_eq!(workloads.len(), 1);
    assert_eq!(workloads[0].workload.id, id);
    assert!(workloads[0].workload.spec["ip"].is_null());
}

#[tokio::test]
async fn test_down_source_does_not_block_healthy_source() {
    let server = MockServer::start().await;
    mount_cluster(&server, "online", "name=eth0,ip=dhcp").await;
    let store = MemoryInventoryStore::new();

    let report = sync_service(
        &store,
        vec![
            proxmox_source(&server.uri()),
            StaticSource::unavailable("k8s", "api server unreachable"),
        ],
    )
    .run_cycle()
    .await
    .unwrap();

    assert!(report.degraded());
    assert_eq!(report.hosts_count, 1);
    assert_eq!(report.workloads_count, 1);
    let k8s = report.sources.iter().find(|s| s.source == "k8s").unwrap();
    assert!(matches!(k8s.outcome, SourceOutcome::Unavailable { .. }));
    assert_eq!(store.hosts().await.len(), 1);
}
