use serde::{Deserialize, Serialize};

use crate::value_objects::{RoomCategory, RoomId, RoomName, Timestamp};

/// 显式创建的命名聊天室。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: String,
    pub category: Option<String>,
    pub created_at: Timestamp,
}

/// 待创建的聊天室（id 与创建时间由存储分配）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatRoom {
    pub name: RoomName,
    pub category: Option<RoomCategory>,
}

impl NewChatRoom {
    pub fn new(name: RoomName, category: Option<RoomCategory>) -> Self {
        Self { name, category }
    }
}
