//! 业务服务层

pub mod reconciler;
pub mod sync_service;

pub use reconciler::{ReconcileError, Reconciler};
pub use sync_service::SyncService;
