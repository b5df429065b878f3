use std::collections::HashSet;
use std::sync::Arc;

use config::DefaultRoom;
use domain::{
    ChatRoom, ChatRoomRepository, NewChatRoom, RepositoryError, RoomCategory, RoomId, RoomName,
};
use tokio::sync::Mutex;

use crate::error::ApplicationError;

#[derive(Debug, Clone)]
pub struct CreateRoomRequest {
    pub name: String,
    pub category: Option<String>,
}

pub struct RoomServiceDependencies {
    pub room_repository: Arc<dyn ChatRoomRepository>,
    pub default_rooms: Vec<NewChatRoom>,
}

impl RoomServiceDependencies {
    /// 用配置中的默认聊天室构造，名称或分类不合法时返回错误。
    pub fn from_config(
        room_repository: Arc<dyn ChatRoomRepository>,
        default_rooms: &[DefaultRoom],
    ) -> Result<Self, ApplicationError> {
        let default_rooms = default_rooms
            .iter()
            .map(|room| {
                Ok(NewChatRoom::new(
                    RoomName::parse(room.name.as_str())?,
                    RoomCategory::parse(room.category.clone())?,
                ))
            })
            .collect::<Result<Vec<_>, ApplicationError>>()?;
        Ok(Self {
            room_repository,
            default_rooms,
        })
    }
}

/// 聊天室目录：默认聊天室引导与增删查。
pub struct RoomService {
    room_repository: Arc<dyn ChatRoomRepository>,
    default_rooms: Vec<NewChatRoom>,
    // 进程内串行化引导；跨进程由存储的 create_missing 保证
    bootstrap_lock: Mutex<()>,
}

impl RoomService {
    pub fn new(deps: RoomServiceDependencies) -> Self {
        Self {
            room_repository: deps.room_repository,
            default_rooms: deps.default_rooms,
            bootstrap_lock: Mutex::new(()),
        }
    }

    /// 补齐缺失的默认聊天室，返回本次新建的部分。可重复调用。
    pub async fn ensure_default_rooms(&self) -> Result<Vec<ChatRoom>, ApplicationError> {
        let _guard = self.bootstrap_lock.lock().await;

        let existing: HashSet<String> = self
            .room_repository
            .list_all()
            .await?
            .into_iter()
            .map(|room| room.name)
            .collect();
        let missing: Vec<NewChatRoom> = self
            .default_rooms
            .iter()
            .filter(|room| !existing.contains(room.name.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(Vec::new());
        }

        let created = self.room_repository.create_missing(missing).await?;
        if !created.is_empty() {
            tracing::info!(count = created.len(), "default rooms created");
        }
        Ok(created)
    }

    pub async fn list_rooms(&self) -> Result<Vec<ChatRoom>, ApplicationError> {
        self.ensure_default_rooms().await?;
        Ok(self.room_repository.list_all().await?)
    }

    pub async fn create_room(&self, request: CreateRoomRequest) -> Result<ChatRoom, ApplicationError> {
        let room = NewChatRoom::new(
            RoomName::parse(request.name)?,
            RoomCategory::parse(request.category)?,
        );
        let created = self.room_repository.create(room).await?;
        tracing::info!(room_id = %created.id, name = %created.name, "room created");
        Ok(created)
    }

    pub async fn get_room(&self, id: RoomId) -> Result<ChatRoom, ApplicationError> {
        self.room_repository
            .find_by_id(id)
            .await?
            .ok_or(ApplicationError::NotFound("room"))
    }

    /// 删除聊天室及其全部消息。
    pub async fn delete_room(&self, id: RoomId) -> Result<(), ApplicationError> {
        match self.room_repository.delete(id).await {
            Ok(()) => {
                tracing::info!(room_id = %id, "room deleted");
                Ok(())
            }
            Err(RepositoryError::NotFound) => Err(ApplicationError::NotFound("room")),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use domain::MockChatRoomRepository;
    use futures::FutureExt;
    use uuid::Uuid;

    use super::*;

    fn room(name: &str) -> ChatRoom {
        ChatRoom {
            id: RoomId::from(Uuid::new_v4()),
            name: name.to_owned(),
            category: None,
            created_at: Utc::now(),
        }
    }

    fn service(repository: MockChatRoomRepository) -> RoomService {
        let deps = RoomServiceDependencies::from_config(
            Arc::new(repository),
            &config::ChatConfig::default().default_rooms,
        )
        .unwrap();
        RoomService::new(deps)
    }

    #[tokio::test]
    async fn bootstrap_creates_only_missing_rooms() {
        let mut repository = MockChatRoomRepository::new();
        repository
            .expect_list_all()
            .times(1)
            .returning(|| async { Ok(vec![room("Foodies")]) }.boxed());
        repository
            .expect_create_missing()
            .withf(|rooms| {
                let names: Vec<_> = rooms.iter().map(|room| room.name.as_str()).collect();
                names == ["General Chat", "Sights & Views", "Hiking Buddies"]
            })
            .times(1)
            .returning(|rooms| {
                let created = rooms
                    .iter()
                    .map(|new_room| room(new_room.name.as_str()))
                    .collect();
                async move { Ok(created) }.boxed()
            });

        let created = service(repository).ensure_default_rooms().await.unwrap();
        assert_eq!(created.len(), 3);
    }

    #[tokio::test]
    async fn bootstrap_is_noop_when_defaults_exist() {
        let mut repository = MockChatRoomRepository::new();
        repository.expect_list_all().returning(|| {
            let rooms = ["General Chat", "Foodies", "Sights & Views", "Hiking Buddies"]
                .into_iter()
                .map(room)
                .collect();
            async move { Ok(rooms) }.boxed()
        });
        repository.expect_create_missing().never();

        let created = service(repository).ensure_default_rooms().await.unwrap();
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn blank_room_name_is_rejected() {
        let mut repository = MockChatRoomRepository::new();
        repository.expect_create().never();

        let result = service(repository)
            .create_room(CreateRoomRequest {
                name: "   ".into(),
                category: Some("food".into()),
            })
            .await;

        assert!(matches!(result, Err(ApplicationError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn deleting_unknown_room_is_not_found() {
        let mut repository = MockChatRoomRepository::new();
        repository
            .expect_delete()
            .returning(|_| async { Err(RepositoryError::NotFound) }.boxed());

        let result = service(repository)
            .delete_room(RoomId::from(Uuid::new_v4()))
            .await;

        assert!(matches!(result, Err(ApplicationError::NotFound("room"))));
    }

    #[tokio::test]
    async fn get_room_maps_missing_to_not_found() {
        let mut repository = MockChatRoomRepository::new();
        repository
            .expect_find_by_id()
            .returning(|_| async { Ok(None) }.boxed());

        let result = service(repository)
            .get_room(RoomId::from(Uuid::new_v4()))
            .await;

        assert!(matches!(result, Err(ApplicationError::NotFound("room"))));
    }
}
