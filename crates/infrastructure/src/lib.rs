//! 基础设施层实现。
//!
//! 提供存储端口的 Postgres 与内存两种适配器，以及按配置选择存储的构建器。

pub mod builder;
pub mod memory;
pub mod migrations;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use memory::MemoryChatStore;
pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgChatStore};
