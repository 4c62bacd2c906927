//! 数据模型模块
//! 规范化的主机 / 工作负载记录，以及一次发现的快照与统计

pub mod host;
pub mod snapshot;
pub mod workload;

pub use host::*;
pub use snapshot::*;
pub use workload::*;

/// 开放的结构化键值包（metadata / spec），可无损往返 JSONB
pub type Metadata = serde_json::Map<String, serde_json::Value>;
