//! 基础设施库存服务
//! 从 Proxmox、Kubernetes 等后端发现主机与工作负载，并协调写入 PostgreSQL

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod scheduler;
pub mod services;
pub mod sources;
pub mod telemetry;
