//! 进程内存储：开发模式与测试使用，语义与 Postgres 实现一致。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use application::Clock;
use domain::{
    ChatMessage, ChatRoom, ChatRoomRepository, ConversationKey, LocationDirectory, LocationId,
    MessageId, MessageRepository, MessageText, NewChatRoom, RepositoryError, RepositoryFuture,
    RoomId, Timestamp, UserDirectory, UserId,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    next_message_id: i64,
    last_timestamp: Option<Timestamp>,
    // 每个会话内按追加顺序存放，即按 (created_at, id) 升序
    messages: HashMap<ConversationKey, Vec<ChatMessage>>,
    // 按创建顺序
    rooms: Vec<ChatRoom>,
    locations: HashSet<LocationId>,
    users: HashMap<UserId, String>,
}

impl State {
    fn conversation_exists(&self, key: ConversationKey) -> bool {
        match key {
            ConversationKey::Location(id) => self.locations.contains(&id),
            ConversationKey::Room(id) => self.rooms.iter().any(|room| room.id == id),
        }
    }

    /// 时间戳不回退：时钟回拨时沿用上一次的时间。
    fn stamp(&mut self, now: Timestamp) -> Timestamp {
        let stamped = match self.last_timestamp {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_timestamp = Some(stamped);
        stamped
    }

    fn insert_room(&mut self, room: NewChatRoom, now: Timestamp) -> ChatRoom {
        let created_at = self.stamp(now);
        let room = ChatRoom {
            id: RoomId::from(Uuid::new_v4()),
            name: room.name.as_str().to_owned(),
            category: room.category.map(|category| category.as_str().to_owned()),
            created_at,
        };
        self.rooms.push(room.clone());
        room
    }
}

struct Inner {
    clock: Arc<dyn Clock>,
    state: RwLock<State>,
}

/// 同时实现四个存储端口的内存存储。克隆共享同一份数据。
#[derive(Clone)]
pub struct MemoryChatStore {
    inner: Arc<Inner>,
}

impl MemoryChatStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                state: RwLock::new(State {
                    next_message_id: 1,
                    ..State::default()
                }),
            }),
        }
    }

    /// 登记一个外部地点，使其会话可用。
    pub async fn add_location(&self, id: LocationId) {
        self.inner.state.write().await.locations.insert(id);
    }

    /// 移除地点并级联删除其消息。
    pub async fn remove_location(&self, id: LocationId) -> bool {
        let mut state = self.inner.state.write().await;
        state.messages.remove(&ConversationKey::Location(id));
        state.locations.remove(&id)
    }

    pub async fn add_user(&self, id: UserId, display_name: impl Into<String>) {
        self.inner
            .state
            .write()
            .await
            .users
            .insert(id, display_name.into());
    }
}

impl MessageRepository for MemoryChatStore {
    fn append(
        &self,
        conversation: ConversationKey,
        sender: Option<UserId>,
        text: MessageText,
    ) -> RepositoryFuture<ChatMessage> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let now = inner.clock.now();
            let mut state = inner.state.write().await;
            if !state.conversation_exists(conversation) {
                return Err(RepositoryError::NotFound);
            }
            let id = MessageId(state.next_message_id);
            state.next_message_id += 1;
            let created_at = state.stamp(now);
            let message = ChatMessage {
                id,
                conversation,
                sender_id: sender,
                text: text.into_inner(),
                created_at,
            };
            state
                .messages
                .entry(conversation)
                .or_default()
                .push(message.clone());
            Ok(message)
        })
    }

    fn list(
        &self,
        conversation: ConversationKey,
        limit: u32,
        before: Option<Timestamp>,
    ) -> RepositoryFuture<Vec<ChatMessage>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.state.read().await;
            let Some(messages) = state.messages.get(&conversation) else {
                return Ok(Vec::new());
            };
            let end = match before {
                Some(before) => messages.partition_point(|message| message.created_at < before),
                None => messages.len(),
            };
            let start = end.saturating_sub(limit as usize);
            Ok(messages[start..end].to_vec())
        })
    }

    fn count(&self, conversation: ConversationKey) -> RepositoryFuture<u64> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.state.read().await;
            Ok(state
                .messages
                .get(&conversation)
                .map_or(0, |messages| messages.len() as u64))
        })
    }

    fn prune(&self, conversation: ConversationKey, keep: u32) -> RepositoryFuture<u64> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.state.write().await;
            let Some(messages) = state.messages.get_mut(&conversation) else {
                return Ok(0);
            };
            let excess = messages.len().saturating_sub(keep as usize);
            messages.drain(..excess);
            Ok(excess as u64)
        })
    }
}

impl ChatRoomRepository for MemoryChatStore {
    fn create(&self, room: NewChatRoom) -> RepositoryFuture<ChatRoom> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let now = inner.clock.now();
            let mut state = inner.state.write().await;
            Ok(state.insert_room(room, now))
        })
    }

    fn find_by_id(&self, id: RoomId) -> RepositoryFuture<Option<ChatRoom>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.state.read().await;
            Ok(state.rooms.iter().find(|room| room.id == id).cloned())
        })
    }

    fn list_all(&self) -> RepositoryFuture<Vec<ChatRoom>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.state.read().await.rooms.clone()) })
    }

    fn delete(&self, id: RoomId) -> RepositoryFuture<()> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.state.write().await;
            let Some(position) = state.rooms.iter().position(|room| room.id == id) else {
                return Err(RepositoryError::NotFound);
            };
            state.rooms.remove(position);
            state.messages.remove(&ConversationKey::Room(id));
            Ok(())
        })
    }

    fn create_missing(&self, rooms: Vec<NewChatRoom>) -> RepositoryFuture<Vec<ChatRoom>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let now = inner.clock.now();
            // 检查与插入在同一把写锁内完成
            let mut state = inner.state.write().await;
            let mut created = Vec::new();
            for room in rooms {
                let exists = state
                    .rooms
                    .iter()
                    .any(|existing| existing.name == room.name.as_str());
                if !exists {
                    created.push(state.insert_room(room, now));
                }
            }
            Ok(created)
        })
    }
}

impl LocationDirectory for MemoryChatStore {
    fn exists(&self, id: LocationId) -> RepositoryFuture<bool> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.state.read().await.locations.contains(&id)) })
    }
}

impl UserDirectory for MemoryChatStore {
    fn display_name(&self, id: UserId) -> RepositoryFuture<Option<String>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.state.read().await.users.get(&id).cloned()) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    /// 可手动拨动的时钟
    struct ManualClock(Mutex<Timestamp>);

    impl ManualClock {
        fn set(&self, value: Timestamp) {
            *self.0.lock().unwrap() = value;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Timestamp {
            *self.0.lock().unwrap()
        }
    }

    fn text(value: &str) -> MessageText {
        MessageText::parse(value, 2000).unwrap()
    }

    #[tokio::test]
    async fn append_to_unknown_conversation_is_not_found() {
        let store = MemoryChatStore::new(Arc::new(application::SystemClock));
        let result = store
            .append(
                ConversationKey::Location(LocationId::from(Uuid::new_v4())),
                None,
                text("hi"),
            )
            .await;
        assert_eq!(result.unwrap_err(), RepositoryError::NotFound);
    }

    #[tokio::test]
    async fn timestamps_never_go_backwards() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock(Mutex::new(start)));
        let store = MemoryChatStore::new(clock.clone());
        let location = LocationId::from(Uuid::new_v4());
        store.add_location(location).await;
        let key = ConversationKey::Location(location);

        let first = store.append(key, None, text("one")).await.unwrap();
        clock.set(start - Duration::seconds(30));
        let second = store.append(key, None, text("two")).await.unwrap();

        assert!(second.id > first.id);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn list_before_excludes_boundary() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock(Mutex::new(start)));
        let store = MemoryChatStore::new(clock.clone());
        let location = LocationId::from(Uuid::new_v4());
        store.add_location(location).await;
        let key = ConversationKey::Location(location);

        for (offset, body) in ["a", "b", "c"].into_iter().enumerate() {
            clock.set(start + Duration::seconds(offset as i64));
            store.append(key, None, text(body)).await.unwrap();
        }

        let page = store
            .list(key, 10, Some(start + Duration::seconds(2)))
            .await
            .unwrap();
        let bodies: Vec<_> = page.iter().map(|message| message.text.as_str()).collect();
        assert_eq!(bodies, ["a", "b"]);
    }

    #[tokio::test]
    async fn deleting_room_drops_its_messages() {
        let store = MemoryChatStore::new(Arc::new(application::SystemClock));
        let room = store
            .create(NewChatRoom::new(
                domain::RoomName::parse("Foodies").unwrap(),
                None,
            ))
            .await
            .unwrap();
        let key = ConversationKey::Room(room.id);
        store.append(key, None, text("hello")).await.unwrap();

        store.delete(room.id).await.unwrap();

        assert_eq!(store.count(key).await.unwrap(), 0);
        assert_eq!(store.delete(room.id).await, Err(RepositoryError::NotFound));
    }
}
