//! Proxmox VE 数据源
//! 节点 -> Host，QEMU 虚拟机 / LXC 容器 -> Workload

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    fetch_json, http_client, is_dynamic_address, strip_cidr, Discovery, DiscoveryError, Source,
    SourceKind,
};
use crate::config::ProxmoxSourceConfig;
use crate::identity;
use crate::models::{
    HealthStatus, Host, HostStatus, HostType, Metadata, PartialFailure, Workload, WorkloadStatus,
    WorkloadType,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Proxmox API 统一包装 `{"data": ...}`
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

/// `/nodes` 列表项
#[derive(Debug, Clone, Deserialize)]
pub struct NodeEntry {
    pub node: String,
    pub status: String,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub maxcpu: Option<u32>,
    #[serde(default)]
    pub mem: Option<u64>,
    #[serde(default)]
    pub maxmem: Option<u64>,
    #[serde(default)]
    pub disk: Option<u64>,
    #[serde(default)]
    pub maxdisk: Option<u64>,
    #[serde(default)]
    pub uptime: Option<u64>,
}

/// `/cluster/status` 列表项（只关心 node 类型）
#[derive(Debug, Clone, Deserialize)]
struct ClusterStatusEntry {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    ip: Option<String>,
}

/// `/nodes/{node}/qemu` 与 `/nodes/{node}/lxc` 列表项
#[derive(Debug, Clone, Deserialize)]
pub struct GuestEntry {
    /// LXC 列表在部分版本中以字符串返回 vmid
    #[serde(deserialize_with = "deserialize_vmid")]
    pub vmid: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub cpus: Option<f64>,
    #[serde(default)]
    pub maxmem: Option<u64>,
    #[serde(default)]
    pub maxdisk: Option<u64>,
    #[serde(default)]
    pub uptime: Option<u64>,
    /// 分号分隔的标签
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub template: Option<u8>,
}

fn deserialize_vmid<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Vmid {
        Num(u32),
        Str(String),
    }

    match Vmid::deserialize(deserializer)? {
        Vmid::Num(n) => Ok(n),
        Vmid::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// 客户机类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestKind {
    Qemu,
    Lxc,
}

impl GuestKind {
    fn path(&self) -> &'static str {
        match self {
            GuestKind::Qemu => "qemu",
            GuestKind::Lxc => "lxc",
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            GuestKind::Qemu => "proxmox-qemu",
            GuestKind::Lxc => "proxmox-lxc",
        }
    }

    fn workload_type(&self) -> WorkloadType {
        match self {
            GuestKind::Qemu => WorkloadType::VirtualMachine,
            GuestKind::Lxc => WorkloadType::Container,
        }
    }
}

/// Proxmox VE 数据源
pub struct ProxmoxSource {
    name: String,
    api_url: String,
    token_id: String,
    token_secret: Secret<String>,
    cluster: String,
    client: reqwest::Client,
}

impl ProxmoxSource {
    pub fn from_config(config: &ProxmoxSourceConfig) -> Result<Self, DiscoveryError> {
        Ok(Self {
            name: config.name.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token_id: config.token_id.clone(),
            token_secret: config.token_secret.clone(),
            cluster: config.cluster.clone(),
            client: http_client(config.insecure_tls, REQUEST_TIMEOUT)?,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, DiscoveryError> {
        let url = format!("{}/api2/json{}", self.api_url, path);
        let request = self.client.get(&url).header(
            "Authorization",
            format!("PVEAPIToken={}={}", self.token_id, self.token_secret.expose_secret()),
        );
        let response: ApiResponse<T> = fetch_json(request, &url).await?;
        Ok(response.data)
    }

    /// 节点名 -> LAN 地址
    async fn node_addresses(&self) -> Result<HashMap<String, String>, DiscoveryError> {
        let entries: Vec<ClusterStatusEntry> = self.get("/cluster/status").await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.kind == "node")
            .filter_map(|e| {
                let ip = e.ip?;
                if is_dynamic_address(&ip) {
                    None
                } else {
                    Some((e.name, strip_cidr(&ip).to_string()))
                }
            })
            .collect())
    }

    async fn list_guests(
        &self,
        node: &str,
        kind: GuestKind,
    ) -> Result<Vec<GuestEntry>, DiscoveryError> {
        self.get(&format!("/nodes/{}/{}", node, kind.path())).await
    }

    /// LXC 容器的静态 IP；DHCP 返回 None
    async fn container_ip(&self, node: &str, vmid: u32) -> Result<Option<String>, DiscoveryError> {
        let config: Metadata = self.get(&format!("/nodes/{}/lxc/{}/config", node, vmid)).await?;
        Ok(config
            .get("net0")
            .and_then(|v| v.as_str())
            .and_then(parse_net_ip))
    }

    /// 查询一个节点上的全部客户机，子资源失败记为部分失败
    async fn discover_node(
        &self,
        node: &NodeEntry,
        node_id: Uuid,
        now: DateTime<Utc>,
    ) -> (Vec<Workload>, Vec<PartialFailure>) {
        let mut workloads = Vec::new();
        let mut failures = Vec::new();
        let placement = GuestPlacement {
            cluster: &self.cluster,
            node: &node.node,
            node_id,
        };

        let (qemu, lxc) = tokio::join!(
            self.list_guests(&node.node, GuestKind::Qemu),
            self.list_guests(&node.node, GuestKind::Lxc)
        );

        match qemu {
            Ok(guests) => workloads.extend(
                guests
                    .iter()
                    .filter(|g| g.template != Some(1))
                    .map(|g| map_guest(&placement, GuestKind::Qemu, g, None, now)),
            ),
            Err(e) => {
                warn!(
                    source = %self.name,
                    node = %node.node,
                    error = %e,
                    "Failed to list QEMU guests"
                );
                failures.push(PartialFailure::new(format!("node/{}/qemu", node.node), e));
            }
        }

        match lxc {
            Ok(guests) => {
                let guests: Vec<_> = guests
                    .into_iter()
                    .filter(|g| g.template != Some(1))
                    .collect();
                let ips = join_all(
                    guests
                        .iter()
                        .map(|g| self.container_ip(&node.node, g.vmid)),
                )
                .await;

                for (guest, ip) in guests.iter().zip(ips) {
                    let ip = match ip {
                        Ok(ip) => ip,
                        Err(e) => {
                            debug!(vmid = guest.vmid, error = %e, "Failed to read LXC config");
                            failures.push(PartialFailure::new(
                                format!("node/{}/lxc/{}/config", node.node, guest.vmid),
                                e,
                            ));
                            None
                        }
                    };
                    workloads.push(map_guest(&placement, GuestKind::Lxc, guest, ip, now));
                }
            }
            Err(e) => {
                warn!(
                    source = %self.name,
                    node = %node.node,
                    error = %e,
                    "Failed to list LXC guests"
                );
                failures.push(PartialFailure::new(format!("node/{}/lxc", node.node), e));
            }
        }

        (workloads, failures)
    }
}

#[async_trait]
impl Source for ProxmoxSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Proxmox
    }

    #[instrument(skip(self), fields(source = %self.name, cluster = %self.cluster))]
    async fn discover(&self) -> Result<Discovery, DiscoveryError> {
        let now = Utc::now();

        // 节点列表失败即整体失败
        let nodes: Vec<NodeEntry> = self.get("/nodes").await?;

        let mut discovery = Discovery::default();

        let addresses = match self.node_addresses().await {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!(error = %e, "Failed to read cluster status, node addresses omitted");
                discovery
                    .partial_failures
                    .push(PartialFailure::new("cluster/status", e));
                HashMap::new()
            }
        };

        for node in &nodes {
            discovery.hosts.push(map_node(
                &self.cluster,
                node,
                addresses.get(&node.node).cloned(),
                now,
            ));
        }

        // 离线节点无法列出客户机，直接跳过
        let online: Vec<_> = nodes
            .iter()
            .zip(discovery.hosts.iter().map(|h| h.id))
            .filter(|(n, _)| n.status == "online")
            .collect();

        let results = join_all(
            online
                .iter()
                .map(|(node, node_id)| self.discover_node(node, *node_id, now)),
        )
        .await;

        for (workloads, failures) in results {
            discovery.workloads.extend(workloads);
            discovery.partial_failures.extend(failures);
        }

        info!(
            hosts = discovery.hosts.len(),
            workloads = discovery.workloads.len(),
            partial_failures = discovery.partial_failures.len(),
            "Proxmox discovery finished"
        );

        Ok(discovery)
    }
}

/// 从 `net0` 配置串中取静态 IP：`name=eth0,bridge=vmbr0,ip=192.168.1.20/24`
pub fn parse_net_ip(net: &str) -> Option<String> {
    net.split(',')
        .filter_map(|part| part.split_once('='))
        .find(|(k, _)| *k == "ip")
        .map(|(_, v)| v)
        .filter(|v| !is_dynamic_address(v))
        .map(|v| strip_cidr(v).to_string())
}

fn node_status(status: &str) -> HostStatus {
    match status {
        "online" => HostStatus::Online,
        "offline" => HostStatus::Offline,
        _ => HostStatus::Unknown,
    }
}

fn guest_status(status: &str) -> (WorkloadStatus, HealthStatus) {
    match status {
        "running" => (WorkloadStatus::Running, HealthStatus::Healthy),
        "stopped" => (WorkloadStatus::Stopped, HealthStatus::Unknown),
        "paused" | "suspended" => (WorkloadStatus::Stopped, HealthStatus::Unhealthy),
        _ => (WorkloadStatus::Unknown, HealthStatus::Unknown),
    }
}

/// 节点 -> Host，自然键 `proxmox-node:<cluster>:<node>`
pub fn map_node(cluster: &str, node: &NodeEntry, lan: Option<String>, now: DateTime<Utc>) -> Host {
    let mut addresses = BTreeMap::new();
    addresses.insert("lan".to_string(), lan);

    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), json!("proxmox"));
    metadata.insert(
        "capacity".to_string(),
        json!({
            "cpu": node.maxcpu,
            "memory_bytes": node.maxmem,
            "disk_bytes": node.maxdisk,
        }),
    );
    metadata.insert(
        "usage".to_string(),
        json!({
            "cpu": node.cpu,
            "memory_bytes": node.mem,
            "disk_bytes": node.disk,
        }),
    );
    metadata.insert("uptime_secs".to_string(), json!(node.uptime));

    Host {
        id: identity::assign_parts(&["proxmox-node", cluster, &node.node]),
        name: node.node.clone(),
        host_type: HostType::ClusterNode,
        cluster: Some(cluster.to_string()),
        addresses,
        status: node_status(&node.status),
        last_seen_at: now,
        tags: BTreeSet::from(["proxmox".to_string()]),
        metadata,
    }
}

/// 客户机所在的集群与节点
#[derive(Debug, Clone, Copy)]
pub struct GuestPlacement<'a> {
    pub cluster: &'a str,
    pub node: &'a str,
    pub node_id: Uuid,
}

/// 客户机 -> Workload，自然键 `proxmox-qemu|proxmox-lxc:<cluster>:<vmid>`
///
/// vmid 在集群内唯一，迁移到其它节点后标识不变；IP 只进入 spec，不参与自然键。
pub fn map_guest(
    placement: &GuestPlacement<'_>,
    kind: GuestKind,
    guest: &GuestEntry,
    ip: Option<String>,
    now: DateTime<Utc>,
) -> Workload {
    let vmid = guest.vmid.to_string();
    let (status, health_status) = guest_status(&guest.status);

    let mut spec = Metadata::new();
    spec.insert("vmid".to_string(), json!(guest.vmid));
    spec.insert("cpus".to_string(), json!(guest.cpus));
    spec.insert("memory_bytes".to_string(), json!(guest.maxmem));
    spec.insert("disk_bytes".to_string(), json!(guest.maxdisk));
    spec.insert("ip".to_string(), json!(ip));

    let tags: Vec<&str> = guest
        .tags
        .as_deref()
        .map(|t| t.split([';', ',']).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), json!("proxmox"));
    metadata.insert("node".to_string(), json!(placement.node));
    metadata.insert("uptime_secs".to_string(), json!(guest.uptime));
    metadata.insert("tags".to_string(), json!(tags));

    Workload {
        id: identity::assign_parts(&[kind.key_prefix(), placement.cluster, &vmid]),
        name: guest.name.clone().unwrap_or_else(|| format!("{}-{}", kind.path(), vmid)),
        workload_type: kind.workload_type(),
        host_id: Some(placement.node_id),
        status,
        health_status,
        namespace: Some(placement.node.to_string()),
        spec,
        last_updated_at: now,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, status: &str) -> NodeEntry {
        NodeEntry {
            node: name.to_string(),
            status: status.to_string(),
            cpu: Some(0.05),
            maxcpu: Some(8),
            mem: Some(4 << 30),
            maxmem: Some(32 << 30),
            disk: None,
            maxdisk: None,
            uptime: Some(3600),
        }
    }

    fn guest(vmid: u32, status: &str) -> GuestEntry {
        GuestEntry {
            vmid,
            name: Some(format!("guest-{}", vmid)),
            status: status.to_string(),
            cpus: Some(2.0),
            maxmem: Some(2 << 30),
            maxdisk: None,
            uptime: None,
            tags: Some("web;prod".to_string()),
            template: None,
        }
    }

    #[test]
    fn test_map_node_identity() {
        let now = Utc::now();
        let host = map_node("homelab", &node("pve", "online"), Some("192.168.1.2".into()), now);

        assert_eq!(host.id, identity::assign("proxmox-node:homelab:pve"));
        assert_eq!(host.name, "pve");
        assert_eq!(host.host_type, HostType::ClusterNode);
        assert_eq!(host.status, HostStatus::Online);
        assert_eq!(host.addresses.get("lan"), Some(&Some("192.168.1.2".to_string())));
        assert_eq!(host.last_seen_at, now);
    }

    #[test]
    fn test_node_status_mapping() {
        let now = Utc::now();
        assert_eq!(map_node("c", &node("a", "offline"), None, now).status, HostStatus::Offline);
        assert_eq!(map_node("c", &node("a", "weird"), None, now).status, HostStatus::Unknown);
    }

    fn placement<'a>(node: &'a str, node_id: Uuid) -> GuestPlacement<'a> {
        GuestPlacement {
            cluster: "homelab",
            node,
            node_id,
        }
    }

    #[test]
    fn test_map_guest_status_and_health() {
        let now = Utc::now();
        let node_id = identity::assign("proxmox-node:homelab:pve");
        let pve = placement("pve", node_id);

        let running = map_guest(&pve, GuestKind::Qemu, &guest(100, "running"), None, now);
        assert_eq!(running.status, WorkloadStatus::Running);
        assert_eq!(running.health_status, HealthStatus::Healthy);
        assert_eq!(running.workload_type, WorkloadType::VirtualMachine);
        assert_eq!(running.host_id, Some(node_id));
        assert_eq!(running.id, identity::assign("proxmox-qemu:homelab:100"));

        let stopped = map_guest(&pve, GuestKind::Lxc, &guest(101, "stopped"), None, now);
        assert_eq!(stopped.status, WorkloadStatus::Stopped);
        assert_eq!(stopped.health_status, HealthStatus::Unknown);
        assert_eq!(stopped.workload_type, WorkloadType::Container);
    }

    #[test]
    fn test_qemu_and_lxc_keys_do_not_collide() {
        let now = Utc::now();
        let pve = placement("pve", Uuid::nil());
        let vm = map_guest(&pve, GuestKind::Qemu, &guest(100, "running"), None, now);
        let ct = map_guest(&pve, GuestKind::Lxc, &guest(100, "running"), None, now);
        assert_ne!(vm.id, ct.id);
    }

    #[test]
    fn test_dhcp_address_change_keeps_identity() {
        let now = Utc::now();
        let g = guest(105, "running");
        let first_ip = parse_net_ip("name=eth0,ip=192.168.1.50/24");
        let second_ip = parse_net_ip("name=eth0,ip=192.168.1.77/24");

        let first = map_guest(&placement("pve", Uuid::nil()), GuestKind::Lxc, &g, first_ip, now);
        let second = map_guest(&placement("pve2", Uuid::nil()), GuestKind::Lxc, &g, second_ip, now);

        assert_eq!(first.id, second.id);
        assert_eq!(first.spec.get("ip"), Some(&json!("192.168.1.50")));
        assert_eq!(second.spec.get("ip"), Some(&json!("192.168.1.77")));
    }

    #[test]
    fn test_parse_net_ip() {
        assert_eq!(
            parse_net_ip("name=eth0,bridge=vmbr0,hwaddr=AA:BB,ip=192.168.1.20/24,type=veth"),
            Some("192.168.1.20".to_string())
        );
        assert_eq!(parse_net_ip("name=eth0,bridge=vmbr0,ip=dhcp"), None);
        assert_eq!(parse_net_ip("name=eth0,bridge=vmbr0"), None);
    }

    #[test]
    fn test_vmid_accepts_string_and_number() {
        let a: GuestEntry =
            serde_json::from_value(json!({"vmid": 100, "status": "running"})).unwrap();
        let b: GuestEntry =
            serde_json::from_value(json!({"vmid": "101", "status": "stopped"})).unwrap();
        assert_eq!(a.vmid, 100);
        assert_eq!(b.vmid, 101);
    }

    #[test]
    fn test_guest_tags_into_metadata() {
        let placement = GuestPlacement {
            cluster: "c",
            node: "n",
            node_id: Uuid::nil(),
        };
        let w = map_guest(&placement, GuestKind::Qemu, &guest(1, "running"), None, Utc::now());
        assert_eq!(w.metadata.get("tags"), Some(&json!(["web", "prod"])));
    }
}
