use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{DeliveryStatus, Identity, Message, ResourceKind, ServerEvent};
use crate::error::{ImError, ImResult};
use crate::protocol::{validate_body, validate_read_batch};
use crate::quota::QuotaLedger;
use crate::routing::{room_for, Router};
use crate::storage::{MessageStore, Stores};

/// 发送请求（实时通道与 HTTP 共用）/ Send request shared by the socket and HTTP paths
#[derive(Clone, Debug)]
pub struct SendRequest {
    pub peer_user_id: String,
    pub body: String,
    pub client_correlation_id: String,
    pub reply_to: Option<String>,
}

/// 已持久化的消息 + 剩余额度 / A persisted message and the remaining quota
#[derive(Clone, Debug)]
pub struct Persisted {
    pub message: Message,
    pub remaining_quota: Option<u64>,
}

impl Persisted {
    /// 给发送方的确认 / Acknowledgement for the sender
    pub fn ack(&self) -> ServerEvent {
        ServerEvent::MessageSent {
            server_message_id: self.message.id.clone(),
            client_correlation_id: self.message.client_correlation_id.clone(),
            remaining_quota: self.remaining_quota,
            timestamp: self.message.created_at.timestamp_millis(),
        }
    }
}

/// HTTP 发送的响应 / HTTP send response
#[derive(Clone, Debug, Serialize)]
pub struct SendReceipt {
    pub server_message_id: String,
    pub client_correlation_id: String,
    pub room_id: String,
    pub remaining_quota: Option<u64>,
    pub timestamp: i64,
    pub status: DeliveryStatus,
}

/// 已读结果 / Result of a mark-read
#[derive(Clone, Debug, Serialize)]
pub struct ReadReceipt {
    pub room_id: String,
    pub message_ids: Vec<String>,
    pub read_at: i64,
}

/// 历史消息条目 / History item
#[derive(Clone, Debug, Serialize)]
pub struct HistoryItem {
    pub server_message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub timestamp: i64,
    pub client_correlation_id: String,
    pub status: DeliveryStatus,
    pub read_at: Option<i64>,
    pub reply_to: Option<String>,
}

impl From<&Message> for HistoryItem {
    fn from(m: &Message) -> Self {
        Self {
            server_message_id: m.id.clone(),
            sender_id: m.sender_id.clone(),
            recipient_id: m.recipient_id.clone(),
            body: m.body.clone(),
            timestamp: m.created_at.timestamp_millis(),
            client_correlation_id: m.client_correlation_id.clone(),
            status: m.status,
            read_at: m.read_at.map(|t| t.timestamp_millis()),
            reply_to: m.reply_to.clone(),
        }
    }
}

/// 会话服务：发送、已读、历史、清空、输入状态
/// Chat service: send, read, history, clear, typing
pub struct ChatService {
    messages: Arc<dyn MessageStore>,
    quota: Arc<QuotaLedger>,
    router: Arc<Router>,
}

impl ChatService {
    pub fn new(stores: &Stores, quota: Arc<QuotaLedger>, router: Arc<Router>) -> Self {
        Self {
            messages: stores.messages.clone(),
            quota,
            router,
        }
    }

    /// 步骤 1–3：校验双方订阅、预留额度、持久化（失败则退还）
    /// Steps 1–3: validate both subscriptions, reserve quota, persist (refund on failure)
    pub async fn persist(&self, identity: &Identity, req: SendRequest) -> ImResult<Persisted> {
        let sender = identity.acting_user();
        let room = room_for(sender, &req.peer_user_id)?;
        validate_body(&req.body)?;
        if req.client_correlation_id.trim().is_empty() {
            return Err(ImError::Validation("client_correlation_id is required".to_string()));
        }

        // (1) 双方订阅有效且发送方开通消息 / both subscriptions active, sending enabled
        self.quota.ensure_messaging_enabled(sender).await?;
        self.quota.ensure_peer_active(&req.peer_user_id).await?;

        if let Some(parent) = &req.reply_to {
            self.ensure_parent_in_thread(sender, &req.peer_user_id, parent).await?;
        }

        // (2) 原子预留 / atomic reservation
        let reservation = self.quota.reserve_for_user(sender, ResourceKind::Message, 1).await?;

        // (3) 持久化 / persist
        let message = Message {
            id: Uuid::new_v4().to_string(),
            thread_key: room.clone(),
            sender_id: sender.to_string(),
            recipient_id: req.peer_user_id.clone(),
            body: req.body,
            created_at: Utc::now(),
            client_correlation_id: req.client_correlation_id,
            status: DeliveryStatus::Sent,
            read_at: None,
            reply_to: req.reply_to,
            actor_id: identity.supervisor().map(str::to_string),
        };
        if let Err(e) = self.messages.append(&room, message.clone()).await {
            error!(sender, room_id = %room, "❌ message persistence failed: {}", e);
            self.quota.release(&reservation).await;
            return Err(ImError::Persistence(e.to_string()));
        }
        match identity.supervisor() {
            Some(supervisor) => info!(
                sender,
                supervisor,
                room_id = %room,
                message_id = %message.id,
                "💬 message sent on behalf of sub-identity"
            ),
            None => info!(sender, room_id = %room, message_id = %message.id, "💬 message sent"),
        }
        Ok(Persisted {
            message,
            remaining_quota: reservation.remaining,
        })
    }

    async fn ensure_parent_in_thread(&self, user: &str, peer: &str, parent: &str) -> ImResult<()> {
        let found = self
            .messages
            .find_thread(user, peer)
            .await?
            .map(|t| t.messages.iter().any(|m| m.id == parent))
            .unwrap_or(false);
        if found {
            Ok(())
        } else {
            Err(ImError::Validation(format!("reply_to {} is not part of this conversation", parent)))
        }
    }

    /// 步骤 5：投递给对方全部活连接；送达则通知发送方
    /// Step 5: deliver to the recipient's live connections and tell the sender when it landed
    pub async fn deliver(&self, persisted: &Persisted) -> bool {
        let m = &persisted.message;
        let event = ServerEvent::NewMessage {
            server_message_id: m.id.clone(),
            room_id: m.thread_key.clone(),
            sender_id: m.sender_id.clone(),
            body: m.body.clone(),
            timestamp: m.created_at.timestamp_millis(),
            client_correlation_id: m.client_correlation_id.clone(),
            reply_to: m.reply_to.clone(),
        };
        if self.router.deliver(&event, &m.recipient_id) == 0 {
            return false;
        }
        match self.messages.mark_delivered(&m.thread_key, &m.id).await {
            Ok(_) => {
                self.router.deliver(
                    &ServerEvent::MessageDelivered {
                        server_message_id: m.id.clone(),
                        room_id: m.thread_key.clone(),
                    },
                    &m.sender_id,
                );
            }
            Err(e) => warn!(message_id = %m.id, "failed to record delivery: {}", e),
        }
        true
    }

    /// HTTP 路径：持久化、投递，再以响应作为确认
    /// HTTP path: persist, deliver, and answer with the receipt
    pub async fn send(&self, identity: &Identity, req: SendRequest) -> ImResult<SendReceipt> {
        let persisted = self.persist(identity, req).await?;
        let delivered = self.deliver(&persisted).await;
        let m = &persisted.message;
        Ok(SendReceipt {
            server_message_id: m.id.clone(),
            client_correlation_id: m.client_correlation_id.clone(),
            room_id: m.thread_key.clone(),
            remaining_quota: persisted.remaining_quota,
            timestamp: m.created_at.timestamp_millis(),
            status: if delivered {
                DeliveryStatus::Delivered
            } else {
                DeliveryStatus::Sent
            },
        })
    }

    /// 标记已读并通知原发送方 / Mark read and notify the original sender
    pub async fn mark_read(&self, identity: &Identity, peer_user_id: &str, message_ids: &[String]) -> ImResult<ReadReceipt> {
        let reader = identity.acting_user();
        let room = room_for(reader, peer_user_id)?;
        validate_read_batch(message_ids)?;
        let read_at = Utc::now();
        let marked = self.messages.mark_read(&room, reader, message_ids, read_at).await?;
        let ids: Vec<String> = marked.iter().map(|m| m.id.clone()).collect();
        if !ids.is_empty() {
            self.router.deliver(
                &ServerEvent::MessagesRead {
                    room_id: room.clone(),
                    reader_id: reader.to_string(),
                    message_ids: ids.clone(),
                    read_at: read_at.timestamp_millis(),
                },
                peer_user_id,
            );
        }
        Ok(ReadReceipt {
            room_id: room,
            message_ids: ids,
            read_at: read_at.timestamp_millis(),
        })
    }

    /// 历史：按持久化顺序，应用本人的清空点，取最近 `limit` 条
    /// History in persistence order, after the caller's cleared-before mark, last `limit` items
    pub async fn history(&self, identity: &Identity, peer_user_id: &str, limit: usize) -> ImResult<Vec<HistoryItem>> {
        let user = identity.acting_user();
        room_for(user, peer_user_id)?;
        let Some(thread) = self.messages.find_thread(user, peer_user_id).await? else {
            return Ok(Vec::new());
        };
        let visible = thread.visible_to(user);
        let skip = visible.len().saturating_sub(limit);
        Ok(visible.into_iter().skip(skip).map(HistoryItem::from).collect())
    }

    /// 只对本人隐藏之前的历史 / Hide earlier history for the caller only
    pub async fn clear(&self, identity: &Identity, peer_user_id: &str) -> ImResult<DateTime<Utc>> {
        let user = identity.acting_user();
        let room = room_for(user, peer_user_id)?;
        let at = Utc::now();
        self.messages.set_cleared_before(&room, user, at).await?;
        info!(user, actor = identity.actor(), room_id = %room, "🧹 history cleared");
        Ok(at)
    }

    /// 输入状态不持久化，对方离线直接失败 / Typing is ephemeral and fails fast when the peer is offline
    pub fn typing(&self, identity: &Identity, peer_user_id: &str, started: bool) -> ImResult<()> {
        let user = identity.acting_user();
        let room = room_for(user, peer_user_id)?;
        let event = if started {
            ServerEvent::TypingStart {
                room_id: room,
                user_id: user.to_string(),
            }
        } else {
            ServerEvent::TypingStop {
                room_id: room,
                user_id: user.to_string(),
            }
        };
        self.router.deliver_now(&event, peer_user_id).map(|_| ())
    }
}
