//! 数据源
//! 每个基础设施后端实现 [`Source`]，产出已带标识的规范化记录

pub mod kubernetes;
pub mod proxmox;

pub use kubernetes::KubernetesSource;
pub use proxmox::ProxmoxSource;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SourcesConfig;
use crate::models::{Host, PartialFailure, Snapshot, Workload};

/// 数据源类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Kubernetes,
    Proxmox,
    /// 测试或外部注入的数据源
    Custom,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Kubernetes => write!(f, "kubernetes"),
            SourceKind::Proxmox => write!(f, "proxmox"),
            SourceKind::Custom => write!(f, "custom"),
        }
    }
}

/// 一次 discover 的结果：部分子资源失败时仍返回能拿到的实体
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub hosts: Vec<Host>,
    pub workloads: Vec<Workload>,
    pub partial_failures: Vec<PartialFailure>,
}

impl Discovery {
    pub fn into_snapshot(self) -> (Snapshot, Vec<PartialFailure>) {
        (
            Snapshot {
                hosts: self.hosts,
                workloads: self.workloads,
            },
            self.partial_failures,
        )
    }
}

/// 数据源整体失败
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Authentication rejected by {0}")]
    Unauthorized(String),

    #[error("Source unreachable: {0}")]
    Unreachable(String),

    #[error("Unexpected HTTP status {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Discovery timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

/// 基础设施数据源
///
/// 协调器和调度器只依赖这个契约，不依赖具体实现。
#[async_trait]
pub trait Source: Send + Sync {
    /// 实例名
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// 查询后端当前状态
    async fn discover(&self) -> Result<Discovery, DiscoveryError>;
}

/// 根据配置构建所有启用的数据源
pub fn build_sources(config: &SourcesConfig) -> Result<Vec<Arc<dyn Source>>, DiscoveryError> {
    let mut sources: Vec<Arc<dyn Source>> = Vec::new();

    if let Some(proxmox) = &config.proxmox {
        sources.push(Arc::new(ProxmoxSource::from_config(proxmox)?));
    }
    if let Some(kubernetes) = &config.kubernetes {
        sources.push(Arc::new(KubernetesSource::from_config(kubernetes)?));
    }

    Ok(sources)
}

/// 构建带超时的 HTTP 客户端
pub(crate) fn http_client(
    insecure_tls: bool,
    timeout: Duration,
) -> Result<reqwest::Client, DiscoveryError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(insecure_tls)
        .user_agent(concat!("infra-inventory/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DiscoveryError::Other(format!("Failed to build HTTP client: {}", e)))
}

/// 发送请求并解码 JSON；401/403 视为认证失败
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<T, DiscoveryError> {
    let response = request
        .send()
        .await
        .map_err(|e| DiscoveryError::Unreachable(format!("{}: {}", url, e)))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(DiscoveryError::Unauthorized(url.to_string()));
    }
    if !status.is_success() {
        return Err(DiscoveryError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    response.json::<T>().await.map_err(|e| DiscoveryError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// 去掉地址中的 CIDR 后缀：`192.168.1.10/24` -> `192.168.1.10`
pub fn strip_cidr(address: &str) -> &str {
    address.split('/').next().unwrap_or(address).trim()
}

/// 是否为 DHCP 动态地址占位（`dhcp`、`auto`、`dhcp6`）
pub fn is_dynamic_address(address: &str) -> bool {
    matches!(
        address.trim().to_ascii_lowercase().as_str(),
        "dhcp" | "dhcp6" | "auto" | "manual"
    )
}
