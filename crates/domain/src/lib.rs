//! 聊天广播子系统的核心领域模型
//!
//! 包含会话标识、消息、聊天室等实体，以及持久化端口（仓储 trait）。
//! 该 crate 不依赖任何运行时或数据库实现。

pub mod chat_room;
pub mod errors;
pub mod message;
pub mod repository;
pub mod value_objects;

pub use chat_room::{ChatRoom, NewChatRoom};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use message::ChatMessage;
pub use repository::{
    ChatRoomRepository, LocationDirectory, MessageRepository, RepositoryFuture, RepositoryResult,
    UserDirectory,
};
pub use value_objects::{
    ConversationKey, LocationId, MessageId, MessageText, RoomCategory, RoomName, RoomId,
    Timestamp, UserId,
};

#[cfg(feature = "testing")]
pub use repository::{
    MockChatRoomRepository, MockLocationDirectory, MockMessageRepository, MockUserDirectory,
};
