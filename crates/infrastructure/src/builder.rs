use std::sync::Arc;

use application::Clock;
use config::DatabaseConfig;
use domain::{
    ChatRoomRepository, LocationDirectory, LocationId, MessageRepository, UserDirectory, UserId,
};
use thiserror::Error;

use crate::{
    memory::MemoryChatStore,
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgChatStore},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 应用层所需的全部存储端口。
#[derive(Clone)]
pub struct Infrastructure {
    pub message_repository: Arc<dyn MessageRepository>,
    pub room_repository: Arc<dyn ChatRoomRepository>,
    pub location_directory: Arc<dyn LocationDirectory>,
    pub user_directory: Arc<dyn UserDirectory>,
}

impl Infrastructure {
    /// 配置了数据库地址时连接 Postgres 并执行迁移，否则使用内存存储。
    pub async fn connect(
        config: &DatabaseConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, InfrastructureError> {
        match &config.url {
            Some(url) => {
                let pool = create_pg_pool(url, config.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                tracing::info!("postgres store ready");
                Ok(Self::from_store(Arc::new(PgChatStore::new(pool))))
            }
            None => {
                tracing::warn!("no database url configured, using in-memory store");
                let store = MemoryChatStore::new(clock);
                seed_memory_store(&store, config).await;
                Ok(Self::from_store(Arc::new(store)))
            }
        }
    }

    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: MessageRepository + ChatRoomRepository + LocationDirectory + UserDirectory + 'static,
    {
        Self {
            message_repository: store.clone(),
            room_repository: store.clone(),
            location_directory: store.clone(),
            user_directory: store,
        }
    }
}

/// 内存存储没有外部地点与用户目录，按配置登记。
async fn seed_memory_store(store: &MemoryChatStore, config: &DatabaseConfig) {
    for &id in &config.seed_locations {
        store.add_location(LocationId::from(id)).await;
        tracing::info!(location_id = %id, "in-memory location available");
    }
    for user in &config.seed_users {
        store.add_user(UserId::from(user.id), user.name.clone()).await;
    }
    if config.seed_locations.is_empty() {
        tracing::warn!("no seed locations configured, location conversations are unavailable");
    }
}
