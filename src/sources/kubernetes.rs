//! Kubernetes 数据源
//! 节点 -> Host，Deployment / StatefulSet / DaemonSet -> Workload

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{fetch_json, http_client, Discovery, DiscoveryError, Source, SourceKind};
use crate::config::KubernetesSourceConfig;
use crate::identity;
use crate::models::{
    HealthStatus, Host, HostStatus, HostType, Metadata, PartialFailure, Workload, WorkloadStatus,
    WorkloadType,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 节点压力类条件，为 True 时节点视为降级
const PRESSURE_CONDITIONS: &[&str] = &[
    "MemoryPressure",
    "DiskPressure",
    "PIDPressure",
    "NetworkUnavailable",
];

#[derive(Debug, Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[serde(default)]
    pub kubelet_version: Option<String>,
    #[serde(default)]
    pub os_image: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub addresses: Vec<NodeAddress>,
    #[serde(default)]
    pub capacity: Option<Metadata>,
    #[serde(default)]
    pub allocatable: Option<Metadata>,
    #[serde(default)]
    pub node_info: Option<NodeInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeSpec {
    #[serde(default)]
    pub unschedulable: Option<bool>,
}

/// `/api/v1/nodes` 列表项
#[derive(Debug, Clone, Deserialize)]
pub struct K8sNode {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodTemplate {
    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppsSpec {
    #[serde(default)]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub template: PodTemplate,
}

/// Deployment / StatefulSet / DaemonSet 共用的状态字段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppsStatus {
    #[serde(default)]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub ready_replicas: Option<i32>,
    #[serde(default)]
    pub available_replicas: Option<i32>,
    #[serde(default)]
    pub desired_number_scheduled: Option<i32>,
    #[serde(default)]
    pub number_ready: Option<i32>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// apps/v1 工作负载对象
#[derive(Debug, Clone, Deserialize)]
pub struct AppsObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: AppsSpec,
    #[serde(default)]
    pub status: AppsStatus,
}

/// apps/v1 资源类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppsKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl AppsKind {
    const ALL: [AppsKind; 3] = [AppsKind::Deployment, AppsKind::StatefulSet, AppsKind::DaemonSet];

    fn resource(&self) -> &'static str {
        match self {
            AppsKind::Deployment => "deployments",
            AppsKind::StatefulSet => "statefulsets",
            AppsKind::DaemonSet => "daemonsets",
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            AppsKind::Deployment => "k8s-deployment",
            AppsKind::StatefulSet => "k8s-statefulset",
            AppsKind::DaemonSet => "k8s-daemonset",
        }
    }

    fn workload_type(&self) -> WorkloadType {
        match self {
            AppsKind::Deployment => WorkloadType::Deployment,
            AppsKind::StatefulSet => WorkloadType::StatefulSet,
            AppsKind::DaemonSet => WorkloadType::DaemonSet,
        }
    }
}

/// Kubernetes 数据源
pub struct KubernetesSource {
    name: String,
    api_url: String,
    token: Secret<String>,
    cluster: String,
    namespaces: Vec<String>,
    client: reqwest::Client,
}

impl KubernetesSource {
    pub fn from_config(config: &KubernetesSourceConfig) -> Result<Self, DiscoveryError> {
        Ok(Self {
            name: config.name.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            cluster: config.cluster.clone(),
            namespaces: config.namespaces.clone(),
            client: http_client(config.insecure_tls, REQUEST_TIMEOUT)?,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, DiscoveryError> {
        let url = format!("{}{}", self.api_url, path);
        let request = self.client.get(&url).bearer_auth(self.token.expose_secret());
        fetch_json(request, &url).await
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, DiscoveryError> {
        if !self.namespaces.is_empty() {
            return Ok(self.namespaces.clone());
        }
        let list: List<K8sNamespace> = self.get("/api/v1/namespaces").await?;
        Ok(list.items.into_iter().map(|n| n.metadata.name).collect())
    }

    async fn list_apps(
        &self,
        namespace: &str,
        kind: AppsKind,
    ) -> Result<Vec<AppsObject>, DiscoveryError> {
        let list: List<AppsObject> = self
            .get(&format!("/apis/apps/v1/namespaces/{}/{}", namespace, kind.resource()))
            .await?;
        Ok(list.items)
    }

    /// 查询一个命名空间内的三类工作负载
    async fn discover_namespace(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> (Vec<Workload>, Vec<PartialFailure>) {
        let mut workloads = Vec::new();
        let mut failures = Vec::new();

        let results = join_all(
            AppsKind::ALL
                .iter()
                .map(|kind| self.list_apps(namespace, *kind)),
        )
        .await;

        for (kind, result) in AppsKind::ALL.iter().zip(results) {
            match result {
                Ok(objects) => workloads.extend(
                    objects
                        .iter()
                        .map(|o| map_workload(&self.cluster, namespace, *kind, o, now)),
                ),
                Err(e) => {
                    warn!(
                        source = %self.name,
                        namespace = %namespace,
                        resource = kind.resource(),
                        error = %e,
                        "Failed to list workloads"
                    );
                    failures.push(PartialFailure::new(
                        format!("namespace/{}/{}", namespace, kind.resource()),
                        e,
                    ));
                }
            }
        }

        (workloads, failures)
    }
}

#[derive(Debug, Deserialize)]
struct K8sNamespace {
    metadata: ObjectMeta,
}

#[async_trait]
impl Source for KubernetesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Kubernetes
    }

    #[instrument(skip(self), fields(source = %self.name, cluster = %self.cluster))]
    async fn discover(&self) -> Result<Discovery, DiscoveryError> {
        let now = Utc::now();

        // 节点列表失败即整体失败（通常是认证或连接问题）
        let nodes: List<K8sNode> = self.get("/api/v1/nodes").await?;

        let mut discovery = Discovery {
            hosts: nodes.items.iter().map(|n| map_node(&self.cluster, n, now)).collect(),
            ..Default::default()
        };

        let namespaces = match self.list_namespaces().await {
            Ok(namespaces) => namespaces,
            Err(e) => {
                warn!(error = %e, "Failed to list namespaces, workloads omitted");
                discovery.partial_failures.push(PartialFailure::new("namespaces", e));
                Vec::new()
            }
        };

        let results = join_all(namespaces.iter().map(|ns| self.discover_namespace(ns, now))).await;
        for (workloads, failures) in results {
            discovery.workloads.extend(workloads);
            discovery.partial_failures.extend(failures);
        }

        info!(
            hosts = discovery.hosts.len(),
            workloads = discovery.workloads.len(),
            namespaces = namespaces.len(),
            partial_failures = discovery.partial_failures.len(),
            "Kubernetes discovery finished"
        );

        Ok(discovery)
    }
}

fn condition_is_true(conditions: &[Condition], kind: &str) -> Option<bool> {
    conditions
        .iter()
        .find(|c| c.kind == kind)
        .and_then(|c| match c.status.as_str() {
            "True" => Some(true),
            "False" => Some(false),
            _ => None,
        })
}

/// Ready 条件决定在线状态，压力条件为 True 时降级
pub fn node_status(conditions: &[Condition]) -> HostStatus {
    match condition_is_true(conditions, "Ready") {
        Some(true) => {
            let pressured = PRESSURE_CONDITIONS
                .iter()
                .any(|kind| condition_is_true(conditions, kind) == Some(true));
            if pressured {
                HostStatus::Degraded
            } else {
                HostStatus::Online
            }
        }
        Some(false) => HostStatus::Offline,
        None => HostStatus::Unknown,
    }
}

/// 节点 -> Host，自然键 `k8s-node:<cluster>:<node>`
pub fn map_node(cluster: &str, node: &K8sNode, now: DateTime<Utc>) -> Host {
    let mut addresses = BTreeMap::new();
    for addr in &node.status.addresses {
        let name = match addr.kind.as_str() {
            "InternalIP" => "lan",
            "ExternalIP" => "public",
            _ => continue,
        };
        addresses
            .entry(name.to_string())
            .or_insert_with(|| Some(addr.address.clone()));
    }
    addresses.entry("lan".to_string()).or_insert(None);

    let mut tags = BTreeSet::from(["kubernetes".to_string()]);
    if node.spec.unschedulable == Some(true) {
        tags.insert("cordoned".to_string());
    }
    if let Some(labels) = &node.metadata.labels {
        for (label, _) in labels.iter().filter(|(k, _)| k.starts_with("node-role.kubernetes.io/")) {
            if let Some(role) = label.rsplit('/').next().filter(|r| !r.is_empty()) {
                tags.insert(format!("role:{}", role));
            }
        }
    }

    let conditions: Vec<_> = node
        .status
        .conditions
        .iter()
        .map(|c| {
            json!({
                "type": c.kind,
                "status": c.status,
                "reason": c.reason,
                "message": c.message,
            })
        })
        .collect();

    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), json!("kubernetes"));
    metadata.insert("capacity".to_string(), json!(node.status.capacity));
    metadata.insert("allocatable".to_string(), json!(node.status.allocatable));
    metadata.insert("labels".to_string(), json!(node.metadata.labels));
    metadata.insert("conditions".to_string(), json!(conditions));
    if let Some(info) = &node.status.node_info {
        metadata.insert("kubelet_version".to_string(), json!(info.kubelet_version));
        metadata.insert("os_image".to_string(), json!(info.os_image));
        metadata.insert("architecture".to_string(), json!(info.architecture));
    }

    Host {
        id: identity::assign_parts(&["k8s-node", cluster, &node.metadata.name]),
        name: node.metadata.name.clone(),
        host_type: HostType::ClusterNode,
        cluster: Some(cluster.to_string()),
        addresses,
        status: node_status(&node.status.conditions),
        last_seen_at: now,
        tags,
        metadata,
    }
}

/// 由副本数与条件推导运行状态和健康状态
pub fn workload_status(kind: AppsKind, object: &AppsObject) -> (WorkloadStatus, HealthStatus) {
    let (desired, ready) = match kind {
        AppsKind::DaemonSet => (
            object.status.desired_number_scheduled.unwrap_or(0),
            object.status.number_ready.unwrap_or(0),
        ),
        _ => (
            object.spec.replicas.unwrap_or(1),
            object.status.ready_replicas.unwrap_or(0),
        ),
    };

    if condition_is_true(&object.status.conditions, "ReplicaFailure") == Some(true) {
        return (WorkloadStatus::Failed, HealthStatus::Unhealthy);
    }

    if desired == 0 {
        (WorkloadStatus::Stopped, HealthStatus::Unknown)
    } else if ready >= desired {
        (WorkloadStatus::Running, HealthStatus::Healthy)
    } else if ready == 0 {
        (WorkloadStatus::Pending, HealthStatus::Unhealthy)
    } else {
        (WorkloadStatus::Running, HealthStatus::Unhealthy)
    }
}

/// apps/v1 对象 -> Workload，自然键 `k8s-<kind>:<cluster>:<namespace>:<name>`
///
/// `namespace` 取自列表请求的命名空间，与对象自身携带的字段无关。
pub fn map_workload(
    cluster: &str,
    namespace: &str,
    kind: AppsKind,
    object: &AppsObject,
    now: DateTime<Utc>,
) -> Workload {
    let (status, health_status) = workload_status(kind, object);

    let images: Vec<_> = object
        .spec
        .template
        .spec
        .containers
        .iter()
        .map(|c| json!({"name": c.name, "image": c.image}))
        .collect();

    let mut spec = Metadata::new();
    match kind {
        AppsKind::DaemonSet => {
            spec.insert("desired".to_string(), json!(object.status.desired_number_scheduled));
            spec.insert("ready".to_string(), json!(object.status.number_ready));
        }
        _ => {
            spec.insert("replicas".to_string(), json!(object.spec.replicas));
            spec.insert("ready_replicas".to_string(), json!(object.status.ready_replicas));
            spec.insert("available_replicas".to_string(), json!(object.status.available_replicas));
        }
    }
    spec.insert("containers".to_string(), json!(images));

    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), json!("kubernetes"));
    metadata.insert("cluster".to_string(), json!(cluster));
    metadata.insert("uid".to_string(), json!(object.metadata.uid));
    metadata.insert("labels".to_string(), json!(object.metadata.labels));

    Workload {
        id: identity::assign_parts(&[kind.key_prefix(), cluster, namespace, &object.metadata.name]),
        name: object.metadata.name.clone(),
        workload_type: kind.workload_type(),
        host_id: None,
        status,
        health_status,
        namespace: Some(namespace.to_string()),
        spec,
        last_updated_at: now,
        metadata,
    }
}
