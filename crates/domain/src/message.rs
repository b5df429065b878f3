use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationKey, MessageId, Timestamp, UserId};

/// 已持久化的一条消息。
///
/// 写入后不可变，只会被保留策略或所属会话的级联删除移除。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub conversation: ConversationKey,
    /// 缺省表示匿名或系统消息
    pub sender_id: Option<UserId>,
    pub text: String,
    pub created_at: Timestamp,
}
