//! 应用层实现。
//!
//! 围绕领域模型的用例服务：消息接入管线、历史查询、聊天室引导，
//! 以及按会话键扇出的实时连接注册表。

pub mod clock;
pub mod dto;
pub mod error;
pub mod registry;
pub mod services;

pub use clock::{Clock, SystemClock};
pub use dto::ChatMessageView;
pub use error::ApplicationError;
pub use registry::{BroadcastReport, ConnectionHandle, ConnectionRegistry, Registration};
pub use services::{
    ChatService, ChatServiceDependencies, ChatSettings, CreateRoomRequest, HistoryQuery,
    LocationConnections, PostMessageRequest, RoomConnections, RoomService,
    RoomServiceDependencies,
};
