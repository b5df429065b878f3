use chrono::{DateTime, Utc};
use domain::{ChatMessage, ConversationKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 推送给实时连接、返回给请求方的消息视图（已补充发送者显示名）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageView {
    pub id: i64,
    pub conversation_key: ConversationKey,
    pub user_id: Option<Uuid>,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub username: Option<String>,
}

impl ChatMessageView {
    pub fn new(message: ChatMessage, username: Option<String>) -> Self {
        Self {
            id: message.id.0,
            conversation_key: message.conversation,
            user_id: message.sender_id.map(Uuid::from),
            text: message.text,
            created_at: message.created_at,
            username,
        }
    }
}
