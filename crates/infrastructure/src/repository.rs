use chrono::{DateTime, Utc};
use domain::{
    ChatMessage, ChatRoom, ChatRoomRepository, ConversationKey, LocationDirectory, LocationId,
    MessageId, MessageRepository, MessageText, NewChatRoom, RepositoryError, RepositoryFuture,
    RoomId, Timestamp, UserDirectory, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

// 默认聊天室引导使用的事务级咨询锁
const ROOM_BOOTSTRAP_LOCK: i64 = 0x7065_616b_726f_6f6d;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            // foreign_key_violation：所属会话不存在
            Some("23503") => return RepositoryError::NotFound,
            Some("23505") => return RepositoryError::Conflict,
            _ => {}
        }
    }
    RepositoryError::storage(err.to_string())
}

/// 会话键对应的表、外键列与键值
fn conversation_table(key: ConversationKey) -> (&'static str, &'static str, Uuid) {
    match key {
        ConversationKey::Location(id) => ("chat_messages", "location_id", id.into()),
        ConversationKey::Room(id) => ("chat_room_messages", "room_id", id.into()),
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: i64,
    user_id: Option<Uuid>,
    message: String,
    created_at: DateTime<Utc>,
}

impl MessageRecord {
    fn into_message(self, conversation: ConversationKey) -> ChatMessage {
        ChatMessage {
            id: MessageId(self.id),
            conversation,
            sender_id: self.user_id.map(UserId::from),
            text: self.message,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: Uuid,
    name: String,
    category: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<RoomRecord> for ChatRoom {
    fn from(value: RoomRecord) -> Self {
        ChatRoom {
            id: RoomId::from(value.id),
            name: value.name,
            category: value.category,
            created_at: value.created_at,
        }
    }
}

/// Postgres 存储，实现全部存储端口。
#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl MessageRepository for PgChatStore {
    fn append(
        &self,
        conversation: ConversationKey,
        sender: Option<UserId>,
        text: MessageText,
    ) -> RepositoryFuture<ChatMessage> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let (table, column, key) = conversation_table(conversation);
            let record = sqlx::query_as::<_, MessageRecord>(&format!(
                r#"
                INSERT INTO {table} ({column}, user_id, message)
                VALUES ($1, $2, $3)
                RETURNING id, user_id, message, created_at
                "#
            ))
            .bind(key)
            .bind(sender.map(Uuid::from))
            .bind(text.as_str())
            .fetch_one(&pool)
            .await
            .map_err(map_sqlx_err)?;

            Ok(record.into_message(conversation))
        })
    }

    fn list(
        &self,
        conversation: ConversationKey,
        limit: u32,
        before: Option<Timestamp>,
    ) -> RepositoryFuture<Vec<ChatMessage>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let (table, column, key) = conversation_table(conversation);
            let records = sqlx::query_as::<_, MessageRecord>(&format!(
                r#"
                SELECT id, user_id, message, created_at
                FROM {table}
                WHERE {column} = $1
                  AND ($2::timestamptz IS NULL OR created_at < $2)
                ORDER BY created_at DESC, id DESC
                LIMIT $3
                "#
            ))
            .bind(key)
            .bind(before)
            .bind(i64::from(limit))
            .fetch_all(&pool)
            .await
            .map_err(map_sqlx_err)?;

            Ok(records
                .into_iter()
                .rev()
                .map(|record| record.into_message(conversation))
                .collect())
        })
    }

    fn count(&self, conversation: ConversationKey) -> RepositoryFuture<u64> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let (table, column, key) = conversation_table(conversation);
            let count: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {table} WHERE {column} = $1"
            ))
            .bind(key)
            .fetch_one(&pool)
            .await
            .map_err(map_sqlx_err)?;

            Ok(u64::try_from(count).unwrap_or_default())
        })
    }

    fn prune(&self, conversation: ConversationKey, keep: u32) -> RepositoryFuture<u64> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let (table, column, key) = conversation_table(conversation);
            let result = sqlx::query(&format!(
                r#"
                DELETE FROM {table}
                WHERE {column} = $1
                  AND id NOT IN (
                      SELECT id FROM {table}
                      WHERE {column} = $1
                      ORDER BY created_at DESC, id DESC
                      LIMIT $2
                  )
                "#
            ))
            .bind(key)
            .bind(i64::from(keep))
            .execute(&pool)
            .await
            .map_err(map_sqlx_err)?;

            Ok(result.rows_affected())
        })
    }
}

impl ChatRoomRepository for PgChatStore {
    fn create(&self, room: NewChatRoom) -> RepositoryFuture<ChatRoom> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, RoomRecord>(
                r#"
                INSERT INTO chat_rooms (id, name, category)
                VALUES ($1, $2, $3)
                RETURNING id, name, category, created_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(room.name.as_str())
            .bind(room.category.as_ref().map(|category| category.as_str()))
            .fetch_one(&pool)
            .await
            .map_err(map_sqlx_err)?;

            Ok(ChatRoom::from(record))
        })
    }

    fn find_by_id(&self, id: RoomId) -> RepositoryFuture<Option<ChatRoom>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, RoomRecord>(
                "SELECT id, name, category, created_at FROM chat_rooms WHERE id = $1",
            )
            .bind(Uuid::from(id))
            .fetch_optional(&pool)
            .await
            .map_err(map_sqlx_err)?;

            Ok(record.map(ChatRoom::from))
        })
    }

    fn list_all(&self) -> RepositoryFuture<Vec<ChatRoom>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let records = sqlx::query_as::<_, RoomRecord>(
                "SELECT id, name, category, created_at FROM chat_rooms ORDER BY created_at ASC, name ASC",
            )
            .fetch_all(&pool)
            .await
            .map_err(map_sqlx_err)?;

            Ok(records.into_iter().map(ChatRoom::from).collect())
        })
    }

    fn delete(&self, id: RoomId) -> RepositoryFuture<()> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM chat_rooms WHERE id = $1")
                .bind(Uuid::from(id))
                .execute(&pool)
                .await
                .map_err(map_sqlx_err)?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound);
            }
            Ok(())
        })
    }

    fn create_missing(&self, rooms: Vec<NewChatRoom>) -> RepositoryFuture<Vec<ChatRoom>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let mut tx = pool.begin().await.map_err(map_sqlx_err)?;

            // 多实例同时引导时串行化，锁随事务结束释放
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(ROOM_BOOTSTRAP_LOCK)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;

            let mut created = Vec::new();
            for room in rooms {
                let record = sqlx::query_as::<_, RoomRecord>(
                    r#"
                    INSERT INTO chat_rooms (id, name, category)
                    SELECT $1, $2, $3
                    WHERE NOT EXISTS (SELECT 1 FROM chat_rooms WHERE name = $2)
                    RETURNING id, name, category, created_at
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(room.name.as_str())
                .bind(room.category.as_ref().map(|category| category.as_str()))
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;

                if let Some(record) = record {
                    created.push(ChatRoom::from(record));
                }
            }

            tx.commit().await.map_err(map_sqlx_err)?;
            Ok(created)
        })
    }
}

impl LocationDirectory for PgChatStore {
    fn exists(&self, id: LocationId) -> RepositoryFuture<bool> {
        let pool = self.pool.clone();
        Box::pin(async move {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM locations WHERE id = $1)")
                .bind(Uuid::from(id))
                .fetch_one(&pool)
                .await
                .map_err(map_sqlx_err)
        })
    }
}

impl UserDirectory for PgChatStore {
    fn display_name(&self, id: UserId) -> RepositoryFuture<Option<String>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE id = $1")
                .bind(Uuid::from(id))
                .fetch_optional(&pool)
                .await
                .map_err(map_sqlx_err)
        })
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
