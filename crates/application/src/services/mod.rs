mod chat_service;
mod room_service;

pub use chat_service::{
    ChatService, ChatServiceDependencies, ChatSettings, HistoryQuery, LocationConnections,
    PostMessageRequest, RoomConnections,
};
pub use room_service::{CreateRoomRequest, RoomService, RoomServiceDependencies};
