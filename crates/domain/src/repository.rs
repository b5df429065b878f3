//! 持久化端口
//!
//! 核心只通过这些 trait 访问外部协作者：消息存储、聊天室登记、
//! 地点存在性检查以及用户显示名查询。

use futures::future::BoxFuture;

use crate::chat_room::{ChatRoom, NewChatRoom};
use crate::errors::RepositoryError;
use crate::message::ChatMessage;
use crate::value_objects::{ConversationKey, LocationId, MessageText, RoomId, Timestamp, UserId};

pub type RepositoryResult<T> = Result<T, RepositoryError>;
pub type RepositoryFuture<T> = BoxFuture<'static, RepositoryResult<T>>;

/// 按会话划分的追加式消息日志。
///
/// 每次调用自身是原子的（单个事务），调用方不会跨调用持锁。
#[cfg_attr(feature = "testing", mockall::automock)]
pub trait MessageRepository: Send + Sync {
    /// 追加一条消息；会话不存在时返回 `RepositoryError::NotFound`。
    /// `id` 与 `created_at` 由存储分配。
    fn append(
        &self,
        conversation: ConversationKey,
        sender: Option<UserId>,
        text: MessageText,
    ) -> RepositoryFuture<ChatMessage>;

    /// 最近的 `limit` 条消息（可选：严格早于 `before`），按旧→新返回。
    fn list(
        &self,
        conversation: ConversationKey,
        limit: u32,
        before: Option<Timestamp>,
    ) -> RepositoryFuture<Vec<ChatMessage>>;

    fn count(&self, conversation: ConversationKey) -> RepositoryFuture<u64>;

    /// 只保留按 `(created_at, id)` 排序最新的 `keep` 条，返回删除条数。
    fn prune(&self, conversation: ConversationKey, keep: u32) -> RepositoryFuture<u64>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
pub trait ChatRoomRepository: Send + Sync {
    fn create(&self, room: NewChatRoom) -> RepositoryFuture<ChatRoom>;
    fn find_by_id(&self, id: RoomId) -> RepositoryFuture<Option<ChatRoom>>;
    /// 全部聊天室，按创建时间升序。
    fn list_all(&self) -> RepositoryFuture<Vec<ChatRoom>>;
    /// 删除聊天室并级联删除其消息；不存在时返回 `NotFound`。
    fn delete(&self, id: RoomId) -> RepositoryFuture<()>;
    /// 原子地创建名称尚不存在的聊天室，返回本次新建的部分。
    fn create_missing(&self, rooms: Vec<NewChatRoom>) -> RepositoryFuture<Vec<ChatRoom>>;
}

/// 外部地点实体的存在性检查。
#[cfg_attr(feature = "testing", mockall::automock)]
pub trait LocationDirectory: Send + Sync {
    fn exists(&self, id: LocationId) -> RepositoryFuture<bool>;
}

/// 外部身份服务：解析用户显示名。
#[cfg_attr(feature = "testing", mockall::automock)]
pub trait UserDirectory: Send + Sync {
    fn display_name(&self, id: UserId) -> RepositoryFuture<Option<String>>;
}
