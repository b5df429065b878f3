use std::sync::Arc;

use application::{
    ApplicationError, ChatService, ChatServiceDependencies, ChatSettings, LocationConnections,
    RoomConnections, RoomService, RoomServiceDependencies,
};
use config::ChatConfig;
use infrastructure::Infrastructure;

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub room_service: Arc<RoomService>,
}

impl AppState {
    pub fn new(chat_service: Arc<ChatService>, room_service: Arc<RoomService>) -> Self {
        Self {
            chat_service,
            room_service,
        }
    }

    /// 在存储端口之上组装两个注册表与用例服务。
    pub fn from_infrastructure(
        chat: &ChatConfig,
        infrastructure: Infrastructure,
    ) -> Result<Self, ApplicationError> {
        let location_connections = Arc::new(LocationConnections::new(
            "location",
            chat.receiver_queue_capacity,
        ));
        let room_connections = Arc::new(RoomConnections::new("room", chat.receiver_queue_capacity));

        let room_service = RoomService::new(RoomServiceDependencies::from_config(
            infrastructure.room_repository.clone(),
            &chat.default_rooms,
        )?);

        let chat_service = ChatService::new(ChatServiceDependencies {
            message_repository: infrastructure.message_repository,
            room_repository: infrastructure.room_repository,
            location_directory: infrastructure.location_directory,
            user_directory: infrastructure.user_directory,
            location_connections,
            room_connections,
            settings: ChatSettings::from(chat),
        });

        Ok(Self::new(Arc::new(chat_service), Arc::new(room_service)))
    }
}
