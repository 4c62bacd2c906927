//! PostgreSQL 存储与读路径测试
//! 需要 TEST_DATABASE_URL 指向可用的 PostgreSQL：cargo test -- --ignored

use infra_inventory::{
    models::{HostListFilters, HostStatus, Snapshot, WorkloadListFilters, WorkloadType},
    repository::{InventoryRepository, InventoryStore, InventoryTx, PgInventoryStore},
    services::Reconciler,
};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{create_test_config, host, homelab_discovery, setup_test_db, workload};

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_reconcile_inserts_then_updates() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let store = Arc::new(PgInventoryStore::new(pool.clone(), Duration::from_secs(5)));
    let reconciler = Reconciler::new(store, Duration::from_secs(5));
    let repo = InventoryRepository::new(pool);

    let (hosts, workloads) = homelab_discovery();
    let snapshot = Snapshot { hosts, workloads };

    let first = reconciler.reconcile(&snapshot).await.unwrap();
    assert_eq!(first.hosts_added, 1);
    assert_eq!(first.workloads_added, 2);

    let stored = repo.get_host(snapshot.hosts[0].id).await.unwrap().unwrap();
    assert_eq!(stored.host.name, "pve");
    assert_eq!(stored.created_at, stored.updated_at);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = reconciler.reconcile(&snapshot).await.unwrap();
    assert_eq!(second.hosts_added, 0);
    assert_eq!(second.hosts_updated, 1);
    assert_eq!(second.workloads_updated, 2);

    let updated = repo.get_host(snapshot.hosts[0].id).await.unwrap().unwrap();
    assert_eq!(updated.created_at, stored.created_at);
    assert!(updated.updated_at > stored.updated_at);
    assert_eq!(repo.count_hosts(&HostListFilters::default()).await.unwrap(), 1);
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_uncommitted_transaction_is_invisible() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let store = PgInventoryStore::new(pool.clone(), Duration::from_secs(5));
    let repo = InventoryRepository::new(pool);

    let pve = host("proxmox-node:homelab:pve", "pve", "homelab", HostStatus::Online);
    let mut tx = store.begin().await.unwrap();
    tx.insert_host(&pve, chrono::Utc::now()).await.unwrap();

    assert!(repo.get_host(pve.id).await.unwrap().is_none());

    tx.rollback().await.unwrap();
    assert!(repo.get_host(pve.id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_list_filters() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let store = Arc::new(PgInventoryStore::new(pool.clone(), Duration::from_secs(5)));
    let reconciler = Reconciler::new(store, Duration::from_secs(5));
    let repo = InventoryRepository::new(pool);

    let pve = host("proxmox-node:homelab:pve", "pve", "homelab", HostStatus::Online);
    let worker = host("k8s-node:prod:worker-1", "worker-1", "prod", HostStatus::Offline);
    let snapshot = Snapshot {
        workloads: vec![
            workload(
                "proxmox-qemu:homelab:100",
                "vm-100",
                WorkloadType::VirtualMachine,
                Some(pve.id),
            ),
            workload("k8s-deployment:prod:default:web", "web", WorkloadType::Deployment, None),
        ],
        hosts: vec![pve.clone(), worker],
    };
    reconciler.reconcile(&snapshot).await.unwrap();

    let offline = HostListFilters {
        status: Some(HostStatus::Offline),
        ..Default::default()
    };
    let hosts = repo.list_hosts(&offline, 50, 0).await.unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].host.name, "worker-1");

    let homelab = HostListFilters {
        cluster: Some("homelab".to_string()),
        search: Some("pv".to_string()),
        ..Default::default()
    };
    assert_eq!(repo.count_hosts(&homelab).await.unwrap(), 1);

    // 刚写入的主机不算过期
    let stale = HostListFilters {
        stale_secs: Some(3600),
        ..Default::default()
    };
    assert_eq!(repo.count_hosts(&stale).await.unwrap(), 0);

    let on_pve = WorkloadListFilters {
        host_id: Some(pve.id),
        ..Default::default()
    };
    let workloads = repo.list_workloads(&on_pve, 50, 0).await.unwrap();
    assert_eq!(workloads.len(), 1);
    assert_eq!(workloads[0].workload.name, "vm-100");

    let deployments = WorkloadListFilters {
        workload_type: Some(WorkloadType::Deployment),
        ..Default::default()
    };
    assert_eq!(repo.count_workloads(&deployments).await.unwrap(), 1);
}
