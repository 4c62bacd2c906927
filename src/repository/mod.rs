//! Database repository layer
//! 写路径：[`InventoryStore`]（协调器使用，整周期一个事务）
//! 读路径：[`InventoryRepository`]（HTTP 查询）

pub mod inventory_repo;
pub mod memory_store;
pub mod pg_store;
pub mod store;

pub use inventory_repo::*;
pub use memory_store::*;
pub use pg_store::*;
pub use store::*;
