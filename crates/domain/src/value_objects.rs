use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型（UTC）。
pub type Timestamp = DateTime<Utc>;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// 从外部文本编码解析，格式错误时返回 `InvalidArgument`。
            pub fn parse(value: &str) -> Result<Self, DomainError> {
                Uuid::parse_str(value.trim())
                    .map(Self)
                    .map_err(|err| DomainError::invalid_argument($field, err.to_string()))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Self::parse(value)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

uuid_identifier!(
    /// 用户唯一标识（由外部身份服务解析得到）。
    UserId,
    "user_id"
);

uuid_identifier!(
    /// 地点唯一标识。地点会话与该外部实体一一绑定。
    LocationId,
    "location_id"
);

uuid_identifier!(
    /// 聊天室唯一标识。
    RoomId,
    "room_id"
);

/// 消息序号，由存储分配，按插入顺序严格递增。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// 会话键：选择一条消息流。
///
/// 地点会话随外部地点实体隐式存在；聊天室是显式创建的命名会话。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ConversationKey {
    Location(LocationId),
    Room(RoomId),
}

impl ConversationKey {
    pub fn is_location(&self) -> bool {
        matches!(self, Self::Location(_))
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Location(id) => write!(f, "location:{id}"),
            Self::Room(id) => write!(f, "room:{id}"),
        }
    }
}

impl From<LocationId> for ConversationKey {
    fn from(value: LocationId) -> Self {
        Self::Location(value)
    }
}

impl From<RoomId> for ConversationKey {
    fn from(value: RoomId) -> Self {
        Self::Room(value)
    }
}

/// 消息正文。非空且不全为空白，长度受上限约束。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageText(String);

impl MessageText {
    pub fn parse(value: impl Into<String>, max_chars: usize) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::invalid_argument("text", "cannot be empty"));
        }
        let length = value.chars().count();
        if length > max_chars {
            return Err(DomainError::invalid_argument(
                "text",
                format!("too long ({length} > {max_chars})"),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// 经过校验的聊天室名称。名称不要求唯一。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(String);

impl RoomName {
    pub const MAX_CHARS: usize = 100;

    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("name", "cannot be empty"));
        }
        if trimmed.chars().count() > Self::MAX_CHARS {
            return Err(DomainError::invalid_argument("name", "too long"));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 聊天室分类标签（可选）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCategory(String);

impl RoomCategory {
    pub const MAX_CHARS: usize = 50;

    /// 空白或缺省视为无分类。
    pub fn parse(value: Option<String>) -> Result<Option<Self>, DomainError> {
        let Some(value) = value else {
            return Ok(None);
        };
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if trimmed.chars().count() > Self::MAX_CHARS {
            return Err(DomainError::invalid_argument("category", "too long"));
        }
        Ok(Some(Self(trimmed.to_owned())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
