//! HTTP 处理器模块

pub mod health;
pub mod inventory;
pub mod metrics;
pub mod sync;
