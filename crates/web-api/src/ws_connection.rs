use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use application::{ChatMessageView, ChatService, ConnectionRegistry, PostMessageRequest};
use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket};
use domain::{ConversationKey, UserId};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

type Registry<K> = ConnectionRegistry<K, Arc<ChatMessageView>>;

/// 客户端上行帧
#[derive(Debug, Deserialize)]
struct IncomingFrame {
    text: String,
    #[serde(default)]
    user_id: Option<String>,
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Bytes),
}

/// 握手失败时以 1008 关闭连接，不进行注册。
pub async fn reject(mut socket: WebSocket, reason: &'static str) {
    tracing::debug!(reason, "rejecting live connection");
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    };
    if let Err(err) = socket.send(WsMessage::Close(Some(frame))).await {
        tracing::debug!(error = %err, "failed to send close frame");
    }
}

/// 单个实时连接：注册到会话，转发广播，并把上行帧送入接入管线。
pub struct LiveConnection<K> {
    chat: Arc<ChatService>,
    registry: Arc<Registry<K>>,
    key: K,
}

impl<K> LiveConnection<K>
where
    K: Copy + Eq + Hash + fmt::Display + Send + Sync + 'static,
    ConversationKey: From<K>,
{
    pub fn new(chat: Arc<ChatService>, registry: Arc<Registry<K>>, key: K) -> Self {
        Self {
            chat,
            registry,
            key,
        }
    }

    pub async fn run(self, socket: WebSocket) {
        let conversation = ConversationKey::from(self.key);
        let registration = self.registry.subscribe(self.key).await;
        let handle = registration.handle;
        let mut outbound = registration.receiver;
        tracing::info!(%conversation, %handle, "live connection opened");

        let (mut sender, mut incoming) = socket.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(8);

        // 发送任务：所有对 sender 的写操作都在这里
        let mut send_task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    Some(view) = outbound.recv() => match serde_json::to_string(view.as_ref()) {
                        Ok(json) => WsMessage::Text(json.into()),
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to serialize message view");
                            continue;
                        }
                    },
                    Some(WsCommand::SendPong(data)) = cmd_rx.recv() => WsMessage::Pong(data),
                    else => break,
                };
                if sender.send(message).await.is_err() {
                    break;
                }
            }
        });

        let chat = self.chat.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                match message {
                    WsMessage::Text(text) => {
                        Self::handle_frame(&chat, conversation, text.as_str()).await;
                    }
                    WsMessage::Ping(data) => {
                        if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Close(_) => break,
                    WsMessage::Pong(_) | WsMessage::Binary(_) => {}
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        self.registry.unregister(self.key, handle).await;
        tracing::info!(%conversation, %handle, "live connection closed");
    }

    /// 无法解析或被管线拒绝的帧直接丢弃，连接保持。
    async fn handle_frame(chat: &ChatService, conversation: ConversationKey, raw: &str) {
        let frame: IncomingFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(%conversation, error = %err, "dropping malformed frame");
                return;
            }
        };
        let sender = frame
            .user_id
            .as_deref()
            .and_then(|value| UserId::parse(value).ok());

        let request = PostMessageRequest {
            sender,
            text: frame.text,
        };
        if let Err(err) = chat.post_message(conversation, request).await {
            tracing::debug!(%conversation, error = %err, "dropping rejected frame");
        }
    }
}
