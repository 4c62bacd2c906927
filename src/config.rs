//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use config::{Config, ConfigError, Environment};
use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

use crate::scheduler::BusyPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:3000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接 URL（使用 Secret 包装，防止日志泄露）
    pub url: Secret<String>,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小连接数
    pub min_connections: u32,
    /// 获取连接超时时间（秒）
    pub acquire_timeout_secs: u64,
    /// 空闲连接超时时间（秒）
    pub idle_timeout_secs: u64,
    /// 连接最大生命周期（秒）
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

/// 同步周期配置
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// 自动同步间隔（毫秒），0 或负数表示关闭自动同步
    pub interval_ms: i64,
    /// 单个数据源 discover 调用的超时时间（秒）
    pub source_timeout_secs: u64,
    /// 单条数据库语句的超时时间（毫秒）
    pub statement_timeout_ms: u64,
    /// 同步周期运行中收到新触发时的处理策略
    pub busy_policy: BusyPolicy,
    /// Queue 策略下等待当前周期结束的最长时间（秒）
    pub queue_timeout_secs: u64,
    /// Queue 策略下允许同时排队的触发数
    pub queue_max_length: usize,
}

impl SyncConfig {
    /// 自动同步间隔；返回 None 表示关闭
    pub fn interval(&self) -> Option<Duration> {
        if self.interval_ms > 0 {
            Some(Duration::from_millis(self.interval_ms as u64))
        } else {
            None
        }
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_secs)
    }
}

/// Proxmox VE 数据源
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProxmoxSourceConfig {
    /// 数据源实例名（出现在周期报告与日志中）
    #[validate(length(min = 1))]
    pub name: String,
    /// API 地址，例如 "https://pve.lan:8006"
    #[validate(url)]
    pub api_url: String,
    /// API Token ID，例如 "root@pam!inventory"
    #[validate(length(min = 1))]
    pub token_id: String,
    /// API Token 密钥
    pub token_secret: Secret<String>,
    /// 集群名，作为自然键的一部分
    #[validate(length(min = 1))]
    pub cluster: String,
    /// 是否接受自签名证书
    #[serde(default)]
    pub insecure_tls: bool,
}

/// Kubernetes 数据源
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct KubernetesSourceConfig {
    #[validate(length(min = 1))]
    pub name: String,
    /// API Server 地址，例如 "https://10.0.0.1:6443"
    #[validate(url)]
    pub api_url: String,
    /// ServiceAccount Bearer Token
    pub token: Secret<String>,
    #[validate(length(min = 1))]
    pub cluster: String,
    /// 需要扫描的命名空间，留空表示全部
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub insecure_tls: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    pub proxmox: Option<ProxmoxSourceConfig>,
    pub kubernetes: Option<KubernetesSourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub sync: SyncConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("server.addr", "0.0.0.0:3000")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("sync.interval_ms", 300_000)?
            .set_default("sync.source_timeout_secs", 30)?
            .set_default("sync.statement_timeout_ms", 10_000)?
            .set_default("sync.busy_policy", "reject")?
            .set_default("sync.queue_timeout_secs", 300)?
            .set_default("sync.queue_max_length", 1)?;

        // 从环境变量加载配置（前缀为 INVENTORY_）
        settings = settings.add_source(
            Environment::with_prefix("INVENTORY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("sources.kubernetes.namespaces"),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    fn validate(&self) -> Result<(), ConfigError> {
        // 验证端口范围
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port != 0 && port < 1024 {
                    return Err(ConfigError::Message("Server port should be >= 1024".to_string()));
                }
            }
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        // 验证数据库连接池配置
        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        // 超时必须有界
        if self.sync.source_timeout_secs == 0 {
            return Err(ConfigError::Message("source_timeout_secs must be > 0".to_string()));
        }
        if self.sync.statement_timeout_ms == 0 {
            return Err(ConfigError::Message("statement_timeout_ms must be > 0".to_string()));
        }
        if self.sync.queue_max_length == 0 {
            return Err(ConfigError::Message("queue_max_length must be >= 1".to_string()));
        }

        if let Some(proxmox) = &self.sources.proxmox {
            proxmox.validate().map_err(|e| {
                ConfigError::Message(format!("Invalid proxmox source config: {}", e))
            })?;
        }
        if let Some(kubernetes) = &self.sources.kubernetes {
            kubernetes.validate().map_err(|e| {
                ConfigError::Message(format!("Invalid kubernetes source config: {}", e))
            })?;
        }

        Ok(())
    }
}
