//! 统一配置中心
//!
//! 配置按以下优先级叠加：
//! - 内置默认值
//! - 可选配置文件（`APP_CONFIG_FILE`，按扩展名识别 toml / yaml / json）
//! - `APP_` 前缀的环境变量，嵌套字段用 `__` 分隔（如 `APP_CHAT__MAX_LOCATION_MESSAGES`）

use std::collections::HashSet;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub chat: ChatConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

/// 数据库配置。未设置 `url` 时使用进程内存储（开发模式）。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[validate(url)]
    pub url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
    /// 内存存储启动时登记的地点，配置了 `url` 时忽略
    #[serde(default)]
    pub seed_locations: Vec<Uuid>,
    /// 内存存储启动时登记的用户，配置了 `url` 时忽略
    #[serde(default)]
    #[validate(nested)]
    pub seed_users: Vec<SeedUser>,
}

/// 开发模式下预置的用户及其显示名
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SeedUser {
    pub id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
}

/// 开发模式默认登记的地点
pub const DEV_LOCATION_ID: Uuid = Uuid::from_u128(0x5c1d_0000_0000_4000_8000_000000000001);

/// 聊天子系统配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_chat"))]
pub struct ChatConfig {
    /// 每个地点会话保留的最大消息数
    #[validate(range(min = 1))]
    pub max_location_messages: u32,
    #[validate(range(min = 1))]
    pub default_room_page_size: u32,
    #[validate(range(min = 1))]
    pub max_room_page_size: u32,
    #[validate(range(min = 1))]
    pub max_message_length: usize,
    /// 每个实时连接的待发送队列容量，满时丢弃该连接的本次投递
    #[validate(range(min = 1))]
    pub receiver_queue_capacity: usize,
    #[validate(nested)]
    pub default_rooms: Vec<DefaultRoom>,
}

/// 启动时需要存在的默认聊天室
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DefaultRoom {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

impl DefaultRoom {
    fn new(name: &str, category: &str) -> Self {
        Self {
            name: name.to_owned(),
            category: Some(category.to_owned()),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
                seed_locations: vec![DEV_LOCATION_ID],
                seed_users: Vec::new(),
            },
            chat: ChatConfig::default(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_location_messages: 200,
            default_room_page_size: 50,
            max_room_page_size: 200,
            max_message_length: 2000,
            receiver_queue_capacity: 64,
            default_rooms: vec![
                DefaultRoom::new("General Chat", "all"),
                DefaultRoom::new("Foodies", "food"),
                DefaultRoom::new("Sights & Views", "sights"),
                DefaultRoom::new("Hiking Buddies", "hiking"),
            ],
        }
    }
}

fn validate_chat(chat: &ChatConfig) -> Result<(), ValidationError> {
    if chat.default_room_page_size > chat.max_room_page_size {
        return Err(ValidationError::new("default_room_page_size_exceeds_max"));
    }
    let mut seen = HashSet::new();
    for room in &chat.default_rooms {
        if !seen.insert(room.name.trim()) {
            return Err(ValidationError::new("duplicate_default_room"));
        }
    }
    Ok(())
}

impl AppConfig {
    /// 默认值 + 可选文件 + 环境变量
    pub fn figment() -> Figment {
        let mut fig = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::prefixed("APP_").split("__"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// 用于日志输出，隐藏数据库凭据
    pub fn sanitized_database_url(&self) -> String {
        match &self.database.url {
            Some(url) => url
                .rsplit('@')
                .next()
                .map(|host| format!("***@{host}"))
                .unwrap_or_default(),
            None => "<in-memory>".to_owned(),
        }
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to extract configuration: {0}")]
    Extract(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_toml(toml: &str) -> Result<AppConfig, ConfigError> {
        AppConfig::from_figment(
            Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::string(toml)),
        )
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chat.max_location_messages, 200);
        assert_eq!(config.chat.default_room_page_size, 50);
        assert_eq!(config.chat.default_rooms.len(), 4);
        assert!(config.database.url.is_none());
        assert_eq!(config.database.seed_locations, [DEV_LOCATION_ID]);
    }

    #[test]
    fn seed_data_is_read_from_file() {
        let config = with_toml(
            r#"
            [database]
            seed_locations = ["0b7c5e9e-3f57-4c3a-9d1e-2f4f3e6a7b10"]

            [[database.seed_users]]
            id = "6f1d2c3b-4a59-4e8f-b7a6-1c2d3e4f5a6b"
            name = "ranger"
            "#,
        )
        .unwrap();
        assert_eq!(config.database.seed_locations.len(), 1);
        assert_eq!(config.database.seed_users[0].name, "ranger");
    }

    #[test]
    fn blank_seed_user_name_is_rejected() {
        let mut config = AppConfig::default();
        config.database.seed_users.push(SeedUser {
            id: Uuid::new_v4(),
            name: String::new(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_values_override_defaults() {
        let config = with_toml(
            r#"
            [server]
            port = 9000

            [chat]
            max_location_messages = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.chat.max_location_messages, 10);
        assert_eq!(config.chat.default_room_page_size, 50);
    }

    #[test]
    fn zero_retention_is_rejected() {
        let result = with_toml(
            r#"
            [chat]
            max_location_messages = 0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn page_size_above_max_is_rejected() {
        let result = with_toml(
            r#"
            [chat]
            default_room_page_size = 500
            max_room_page_size = 100
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn duplicate_default_rooms_are_rejected() {
        let mut config = AppConfig::default();
        config.chat.default_rooms.push(DefaultRoom::new("Foodies", "food"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_database_url_is_rejected() {
        let result = with_toml(
            r#"
            [database]
            url = "not a url"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn database_url_is_sanitized() {
        let mut config = AppConfig::default();
        assert_eq!(config.sanitized_database_url(), "<in-memory>");
        config.database.url = Some("postgres://user:secret@db:5432/chat".into());
        assert_eq!(config.sanitized_database_url(), "***@db:5432/chat");
    }
}
