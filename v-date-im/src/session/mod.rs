//! 连接会话状态机 / Connection session state machine
//!
//! Connecting → Authenticated → Joined(rooms…) → Closed；Closed 为终态。
//! Closed is terminal; a new physical connection creates a new session.

use std::collections::BTreeSet;

use crate::domain::Identity;

/// 已认证会话 / An authenticated session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthedSession {
    pub client_id: String,
    pub identity: Identity,
    /// 认证时的订阅（上下文，仅用于日志与审计）/ Subscription at auth time, for logs and audit
    pub subscription_id: Option<String>,
    /// 已加入的房间，可同时加入多个 / Joined rooms; several at once is fine
    pub rooms: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting { client_id: String },
    Authenticated(AuthedSession),
    Closed { client_id: String },
}

/// 状态阶段 / Coarse phase of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Authenticated,
    Joined,
    Closed,
}

/// I/O 执行后回灌给状态机的结果 / Results of executed effects, fed back into the machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Authenticated {
        identity: Identity,
        subscription_id: Option<String>,
    },
    AuthFailed,
    Joined {
        room_id: String,
    },
    Disconnected,
}

impl SessionState {
    pub fn new(client_id: impl Into<String>) -> Self {
        SessionState::Connecting {
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            SessionState::Connecting { client_id } | SessionState::Closed { client_id } => client_id,
            SessionState::Authenticated(s) => &s.client_id,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Connecting { .. } => SessionPhase::Connecting,
            SessionState::Authenticated(s) if s.rooms.is_empty() => SessionPhase::Authenticated,
            SessionState::Authenticated(_) => SessionPhase::Joined,
            SessionState::Closed { .. } => SessionPhase::Closed,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Authenticated(s) => Some(&s.identity),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed { .. })
    }

    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            SessionState::Authenticated(s) => s.subscription_id.as_deref(),
            _ => None,
        }
    }

    /// 应用结果；非法转换保持原状态 / Apply an outcome; illegal transitions leave the state untouched
    pub fn apply(self, outcome: Outcome) -> SessionState {
        match (self, outcome) {
            (SessionState::Closed { client_id }, _) => SessionState::Closed { client_id },
            (state, Outcome::Disconnected) => SessionState::Closed {
                client_id: state.client_id().to_string(),
            },
            (
                SessionState::Connecting { client_id },
                Outcome::Authenticated {
                    identity,
                    subscription_id,
                },
            ) => SessionState::Authenticated(AuthedSession {
                client_id,
                identity,
                subscription_id,
                rooms: BTreeSet::new(),
            }),
            // 认证失败立即关闭，不在同一连接内重试 / no retry within the same connection
            (SessionState::Connecting { client_id }, Outcome::AuthFailed) => SessionState::Closed { client_id },
            (SessionState::Authenticated(mut s), Outcome::Joined { room_id }) => {
                s.rooms.insert(room_id);
                SessionState::Authenticated(s)
            }
            (state, _) => state,
        }
    }
}
