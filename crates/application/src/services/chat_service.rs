use std::collections::HashMap;
use std::sync::Arc;

use config::ChatConfig;
use domain::{
    ChatRoomRepository, ConversationKey, LocationDirectory, LocationId, MessageRepository,
    MessageText, RoomId, Timestamp, UserDirectory, UserId,
};

use crate::{dto::ChatMessageView, error::ApplicationError, registry::ConnectionRegistry};

pub type LocationConnections = ConnectionRegistry<LocationId, Arc<ChatMessageView>>;
pub type RoomConnections = ConnectionRegistry<RoomId, Arc<ChatMessageView>>;

/// 管线用到的策略参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    pub max_location_messages: u32,
    pub default_room_page_size: u32,
    pub max_room_page_size: u32,
    pub max_message_length: usize,
}

impl From<&ChatConfig> for ChatSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            max_location_messages: config.max_location_messages,
            default_room_page_size: config.default_room_page_size,
            max_room_page_size: config.max_room_page_size,
            max_message_length: config.max_message_length,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct PostMessageRequest {
    pub sender: Option<UserId>,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    /// 只返回严格早于该时间的消息
    pub before: Option<Timestamp>,
}

pub struct ChatServiceDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub room_repository: Arc<dyn ChatRoomRepository>,
    pub location_directory: Arc<dyn LocationDirectory>,
    pub user_directory: Arc<dyn UserDirectory>,
    pub location_connections: Arc<LocationConnections>,
    pub room_connections: Arc<RoomConnections>,
    pub settings: ChatSettings,
}

/// 消息接入管线：校验 → 规范化 → 持久化 → 补充显示名 → 保留策略 → 扇出。
///
/// 持久化与广播是先后两步，中间不持有任何锁。
pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    pub fn location_connections(&self) -> &Arc<LocationConnections> {
        &self.deps.location_connections
    }

    pub fn room_connections(&self) -> &Arc<RoomConnections> {
        &self.deps.room_connections
    }

    /// 会话键必须指向一个存在的会话。
    pub async fn ensure_conversation(&self, key: ConversationKey) -> Result<(), ApplicationError> {
        let exists = match key {
            ConversationKey::Location(id) => self.deps.location_directory.exists(id).await?,
            ConversationKey::Room(id) => self
                .deps
                .room_repository
                .find_by_id(id)
                .await?
                .is_some(),
        };
        if exists {
            Ok(())
        } else {
            Err(ApplicationError::NotFound(conversation_kind(key)))
        }
    }

    pub async fn post_location_message(
        &self,
        location_id: LocationId,
        request: PostMessageRequest,
    ) -> Result<ChatMessageView, ApplicationError> {
        self.post_message(ConversationKey::Location(location_id), request)
            .await
    }

    pub async fn post_room_message(
        &self,
        room_id: RoomId,
        request: PostMessageRequest,
    ) -> Result<ChatMessageView, ApplicationError> {
        self.post_message(ConversationKey::Room(room_id), request)
            .await
    }

    pub async fn post_message(
        &self,
        key: ConversationKey,
        request: PostMessageRequest,
    ) -> Result<ChatMessageView, ApplicationError> {
        self.ensure_conversation(key).await?;

        let text = MessageText::parse(request.text, self.deps.settings.max_message_length)?;

        let message = self
            .deps
            .message_repository
            .append(key, request.sender, text)
            .await
            .map_err(|err| {
                tracing::error!(conversation = %key, error = %err, "failed to persist message");
                ApplicationError::from(err)
            })?;

        let username = self.resolve_username(message.sender_id).await;

        // 只有地点会话受保留上限约束，聊天室历史不裁剪
        if key.is_location() {
            self.apply_retention(key).await;
        }

        let view = ChatMessageView::new(message, username);
        self.fan_out(key, view.clone()).await;
        Ok(view)
    }

    pub async fn location_history(
        &self,
        location_id: LocationId,
        query: HistoryQuery,
    ) -> Result<Vec<ChatMessageView>, ApplicationError> {
        self.history(ConversationKey::Location(location_id), query)
            .await
    }

    pub async fn room_history(
        &self,
        room_id: RoomId,
        query: HistoryQuery,
    ) -> Result<Vec<ChatMessageView>, ApplicationError> {
        self.history(ConversationKey::Room(room_id), query).await
    }

    /// 历史消息，旧→新排列。
    pub async fn history(
        &self,
        key: ConversationKey,
        query: HistoryQuery,
    ) -> Result<Vec<ChatMessageView>, ApplicationError> {
        self.ensure_conversation(key).await?;

        let limit = self.page_size(key, query.limit);
        let messages = self
            .deps
            .message_repository
            .list(key, limit, query.before)
            .await?;

        let mut names: HashMap<UserId, Option<String>> = HashMap::new();
        let mut views = Vec::with_capacity(messages.len());
        for message in messages {
            let username = match message.sender_id {
                Some(id) => {
                    if let Some(name) = names.get(&id) {
                        name.clone()
                    } else {
                        let name = self.resolve_username(Some(id)).await;
                        names.insert(id, name.clone());
                        name
                    }
                }
                None => None,
            };
            views.push(ChatMessageView::new(message, username));
        }
        Ok(views)
    }

    fn page_size(&self, key: ConversationKey, requested: Option<u32>) -> u32 {
        let settings = &self.deps.settings;
        let (default, max) = match key {
            ConversationKey::Location(_) => {
                (settings.max_location_messages, settings.max_location_messages)
            }
            ConversationKey::Room(_) => {
                (settings.default_room_page_size, settings.max_room_page_size)
            }
        };
        requested.unwrap_or(default).min(max).max(1)
    }

    /// 查询失败按无显示名处理，不影响消息本身。
    async fn resolve_username(&self, sender: Option<UserId>) -> Option<String> {
        let sender = sender?;
        match self.deps.user_directory.display_name(sender).await {
            Ok(name) => name,
            Err(err) => {
                tracing::warn!(user_id = %sender, error = %err, "display name lookup failed");
                None
            }
        }
    }

    async fn apply_retention(&self, key: ConversationKey) {
        let keep = self.deps.settings.max_location_messages;
        match self.deps.message_repository.prune(key, keep).await {
            Ok(0) => {}
            Ok(deleted) => {
                tracing::debug!(conversation = %key, deleted, keep, "pruned old messages");
            }
            Err(err) => {
                tracing::warn!(conversation = %key, error = %err, "failed to prune old messages");
            }
        }
    }

    async fn fan_out(&self, key: ConversationKey, view: ChatMessageView) {
        let payload = Arc::new(view);
        let report = match key {
            ConversationKey::Location(id) => {
                self.deps.location_connections.broadcast(id, payload).await
            }
            ConversationKey::Room(id) => self.deps.room_connections.broadcast(id, payload).await,
        };
        tracing::trace!(
            conversation = %key,
            delivered = report.delivered,
            dropped = report.dropped,
            "message fanned out"
        );
    }
}

fn conversation_kind(key: ConversationKey) -> &'static str {
    match key {
        ConversationKey::Location(_) => "location",
        ConversationKey::Room(_) => "room",
    }
}
