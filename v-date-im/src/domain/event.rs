//! 实时事件协议 / Real-time event protocol
//!
//! 所有帧都是 `{"type": "...", "data": {...}}` 形式的 JSON 文本。
//! Every frame is a JSON text of the form `{"type": "...", "data": {...}}`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::call::CallType;
use super::message::ProfileSnapshot;

/// 原始信封 / Raw envelope, used to parse before dispatching on `type`
#[derive(Serialize, Deserialize, Debug, JsonSchema)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// 通话信令负载（客户端 → 服务端）/ Call signaling payload, client to server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallSignal {
    pub room_id: String,
    pub peer_user_id: String,
    pub call_type: CallType,
}

/// 客户端事件 / Client → server events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Auth {
        token: String,
    },
    Ping {},
    OnlineUsers {},
    JoinConversation {
        peer_user_id: String,
    },
    SendMessage {
        peer_user_id: String,
        body: String,
        client_correlation_id: String,
        #[serde(default)]
        reply_to: Option<String>,
    },
    TypingStart {
        peer_user_id: String,
    },
    TypingStop {
        peer_user_id: String,
    },
    MarkRead {
        peer_user_id: String,
        message_ids: Vec<String>,
    },
    CallInvite(CallSignal),
    CallAccept(CallSignal),
    CallReject(CallSignal),
    CallEnd(CallSignal),
}

impl ClientEvent {
    /// 解析文本帧；错误信息可直接回给客户端
    /// Parse a text frame; the error text is safe to echo back to the client
    pub fn parse(text: &str) -> Result<ClientEvent, String> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| format!("invalid json: {}", e))?;
        let data = match envelope.data {
            serde_json::Value::Null => serde_json::json!({}),
            other => other,
        };
        let tagged = serde_json::json!({ "type": envelope.event_type, "data": data });
        serde_json::from_value(tagged)
            .map_err(|e| format!("invalid '{}' event: {}", envelope.event_type, e))
    }
}

/// 错误类别（线上统一信封）/ Error kind carried by the uniform `error` event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    Subscription,
    QuotaExceeded,
    PeerUnavailable,
    Validation,
    Persistence,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Subscription => "subscription",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::PeerUnavailable => "peer_unavailable",
            ErrorKind::Validation => "validation",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Internal => "internal",
        }
    }
}

/// 在线用户 / Online user entry of a presence snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OnlineUser {
    pub user_id: String,
    pub profile: ProfileSnapshot,
    /// 毫秒时间戳 / epoch millis
    pub last_seen: i64,
}

/// 通话信令（服务端 → 客户端）/ Call signaling, server to client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallNotice {
    pub call_id: String,
    pub room_id: String,
    /// 对方用户 / The other party from the receiver's point of view
    pub peer_user_id: String,
    pub call_type: CallType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
}

/// 服务端事件 / Server → client events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        client_id: String,
    },
    AuthResponse {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        supervisor_id: Option<String>,
    },
    Pong {
        timestamp: i64,
    },
    UserOnline(OnlineUser),
    UserOffline {
        user_id: String,
        last_seen: i64,
    },
    OnlineUsers {
        users: Vec<OnlineUser>,
    },
    Joined {
        room_id: String,
        peer_user_id: String,
        peer_online: bool,
    },
    PeerJoined {
        room_id: String,
        user_id: String,
    },
    MessageSent {
        server_message_id: String,
        client_correlation_id: String,
        /// None = 不限 / None means unlimited
        remaining_quota: Option<u64>,
        timestamp: i64,
    },
    NewMessage {
        server_message_id: String,
        room_id: String,
        sender_id: String,
        body: String,
        timestamp: i64,
        client_correlation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
    },
    MessageDelivered {
        server_message_id: String,
        room_id: String,
    },
    TypingStart {
        room_id: String,
        user_id: String,
    },
    TypingStop {
        room_id: String,
        user_id: String,
    },
    MessagesRead {
        room_id: String,
        reader_id: String,
        message_ids: Vec<String>,
        read_at: i64,
    },
    CallInvite(CallNotice),
    CallAccept(CallNotice),
    CallReject(CallNotice),
    CallEnd(CallNotice),
    /// 呼叫失败（如对方离线）/ Call could not be placed, e.g. peer offline
    CallFailed {
        room_id: String,
        peer_user_id: String,
        call_type: CallType,
        reason: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn to_text(&self) -> String {
        // 所有字段均可序列化 / every field is plain data
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","data":{"kind":"internal","message":"encode failed"}}"#.to_string()
        })
    }

    /// 事件名（日志用）/ Event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::AuthResponse { .. } => "auth_response",
            ServerEvent::Pong { .. } => "pong",
            ServerEvent::UserOnline(_) => "user_online",
            ServerEvent::UserOffline { .. } => "user_offline",
            ServerEvent::OnlineUsers { .. } => "online_users",
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::PeerJoined { .. } => "peer_joined",
            ServerEvent::MessageSent { .. } => "message_sent",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::MessageDelivered { .. } => "message_delivered",
            ServerEvent::TypingStart { .. } => "typing_start",
            ServerEvent::TypingStop { .. } => "typing_stop",
            ServerEvent::MessagesRead { .. } => "messages_read",
            ServerEvent::CallInvite(_) => "call_invite",
            ServerEvent::CallAccept(_) => "call_accept",
            ServerEvent::CallReject(_) => "call_reject",
            ServerEvent::CallEnd(_) => "call_end",
            ServerEvent::CallFailed { .. } => "call_failed",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// 协议的 JSON Schema / JSON schema of both directions of the protocol
pub fn protocol_schema() -> serde_json::Value {
    serde_json::json!({
        "client": schemars::schema_for!(ClientEvent),
        "server": schemars::schema_for!(ServerEvent),
    })
}
