//! 协议归约器 / Protocol reducer
//!
//! `reduce(state, event) -> (state, effects)` 是纯函数：校验负载并决定要做什么，
//! 实际 I/O（鉴权、持久化、投递）由外层驱动执行。
//! `reduce` is pure: it validates payloads and decides what to do; the outer
//! driver performs the I/O (auth, persistence, delivery).

use crate::domain::{CallSignal, ClientEvent, ErrorKind, ServerEvent};
use crate::error::ImError;
use crate::routing::{room_for, validate_user_id};
use crate::session::SessionState;

/// 消息正文上限（字符）/ Body length limit in characters
pub const MAX_BODY_CHARS: usize = 4000;
/// 单次已读上限 / Max ids in one mark_read
pub const MAX_READ_BATCH: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallAction {
    Invite,
    Accept,
    Reject,
    End,
}

/// 外层驱动需要执行的副作用 / Side effects for the outer driver
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// 直接回给本连接 / Send straight back to this connection
    Reply(ServerEvent),
    Authenticate {
        token: String,
    },
    Join {
        peer_user_id: String,
    },
    Send {
        peer_user_id: String,
        body: String,
        client_correlation_id: String,
        reply_to: Option<String>,
    },
    Typing {
        peer_user_id: String,
        room_id: String,
        started: bool,
    },
    MarkRead {
        peer_user_id: String,
        message_ids: Vec<String>,
    },
    Call {
        action: CallAction,
        signal: CallSignal,
    },
    OnlineUsers,
    Heartbeat,
    Close {
        reason: String,
    },
}

fn reject(err: ImError) -> Vec<Effect> {
    vec![Effect::Reply(ServerEvent::error(err.kind(), err.public_message()))]
}

fn pong() -> Vec<Effect> {
    vec![
        Effect::Heartbeat,
        Effect::Reply(ServerEvent::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }),
    ]
}

/// 单个事件的归约 / Reduce one client event
pub fn reduce(state: SessionState, event: ClientEvent) -> (SessionState, Vec<Effect>) {
    match state {
        SessionState::Closed { .. } => (state, Vec::new()),
        SessionState::Connecting { .. } => {
            let effects = match event {
                ClientEvent::Auth { token } if token.trim().is_empty() => {
                    let state = state.apply(crate::session::Outcome::AuthFailed);
                    return (
                        state,
                        vec![
                            Effect::Reply(ServerEvent::error(ErrorKind::Authentication, "missing credential")),
                            Effect::Close {
                                reason: "authentication failed".to_string(),
                            },
                        ],
                    );
                }
                ClientEvent::Auth { token } => vec![Effect::Authenticate { token }],
                ClientEvent::Ping {} => pong(),
                _ => reject(ImError::Authentication("authenticate first".to_string())),
            };
            (state, effects)
        }
        SessionState::Authenticated(ref session) => {
            let user_id = session.identity.acting_user().to_string();
            let effects = match reduce_authenticated(&user_id, event) {
                Ok(effects) => effects,
                Err(err) => reject(err),
            };
            (state, effects)
        }
    }
}

fn reduce_authenticated(user_id: &str, event: ClientEvent) -> Result<Vec<Effect>, ImError> {
    match event {
        ClientEvent::Auth { .. } => Err(ImError::Validation("already authenticated".to_string())),
        ClientEvent::Ping {} => Ok(pong()),
        ClientEvent::OnlineUsers {} => Ok(vec![Effect::OnlineUsers]),
        ClientEvent::JoinConversation { peer_user_id } => {
            room_for(user_id, &peer_user_id)?;
            Ok(vec![Effect::Join { peer_user_id }])
        }
        ClientEvent::SendMessage {
            peer_user_id,
            body,
            client_correlation_id,
            reply_to,
        } => {
            room_for(user_id, &peer_user_id)?;
            validate_body(&body)?;
            if client_correlation_id.trim().is_empty() {
                return Err(ImError::Validation("client_correlation_id is required".to_string()));
            }
            if matches!(&reply_to, Some(parent) if parent.trim().is_empty()) {
                return Err(ImError::Validation("reply_to must not be empty".to_string()));
            }
            Ok(vec![Effect::Send {
                peer_user_id,
                body,
                client_correlation_id,
                reply_to,
            }])
        }
        ClientEvent::TypingStart { peer_user_id } => typing(user_id, peer_user_id, true),
        ClientEvent::TypingStop { peer_user_id } => typing(user_id, peer_user_id, false),
        ClientEvent::MarkRead {
            peer_user_id,
            message_ids,
        } => {
            room_for(user_id, &peer_user_id)?;
            validate_read_batch(&message_ids)?;
            Ok(vec![Effect::MarkRead {
                peer_user_id,
                message_ids,
            }])
        }
        ClientEvent::CallInvite(signal) => call(user_id, CallAction::Invite, signal),
        ClientEvent::CallAccept(signal) => call(user_id, CallAction::Accept, signal),
        ClientEvent::CallReject(signal) => call(user_id, CallAction::Reject, signal),
        ClientEvent::CallEnd(signal) => call(user_id, CallAction::End, signal),
    }
}

pub fn validate_body(body: &str) -> Result<(), ImError> {
    if body.trim().is_empty() {
        return Err(ImError::Validation("message body is empty".to_string()));
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(ImError::Validation(format!(
            "message body exceeds {} characters",
            MAX_BODY_CHARS
        )));
    }
    Ok(())
}

pub fn validate_read_batch(message_ids: &[String]) -> Result<(), ImError> {
    if message_ids.is_empty() {
        return Err(ImError::Validation("message_ids is empty".to_string()));
    }
    if message_ids.len() > MAX_READ_BATCH {
        return Err(ImError::Validation(format!(
            "at most {} message ids per request",
            MAX_READ_BATCH
        )));
    }
    Ok(())
}

fn typing(user_id: &str, peer_user_id: String, started: bool) -> Result<Vec<Effect>, ImError> {
    let room_id = room_for(user_id, &peer_user_id)?;
    Ok(vec![Effect::Typing {
        peer_user_id,
        room_id,
        started,
    }])
}

fn call(user_id: &str, action: CallAction, signal: CallSignal) -> Result<Vec<Effect>, ImError> {
    validate_user_id("peer_user_id", &signal.peer_user_id)?;
    let expected = room_for(user_id, &signal.peer_user_id)?;
    if signal.room_id != expected {
        return Err(ImError::Validation(format!(
            "room_id does not match the conversation with {}",
            signal.peer_user_id
        )));
    }
    Ok(vec![Effect::Call { action, signal }])
}
