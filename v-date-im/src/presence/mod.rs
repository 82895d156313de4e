//! 在线状态目录 / Presence directory
//!
//! 用户 → 多个在线连接（多端）。最后一个连接断开后进入宽限期，
//! 宽限期内重连不会向观察者广播离线。
//! User → live connections (multi-device). When the last connection closes
//! the user enters a grace window; reconnecting inside it never broadcasts
//! an offline event to observers.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info};

use crate::domain::{OnlineUser, ProfileSnapshot, ServerEvent};

/// 连接句柄：写任务的发送端 / Connection handle, the sending side of a writer task
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    pub client_id: String,
    sender: mpsc::UnboundedSender<WsMessage>,
}

impl ConnectionHandle {
    pub fn new(client_id: impl Into<String>, sender: mpsc::UnboundedSender<WsMessage>) -> Self {
        Self {
            client_id: client_id.into(),
            sender,
        }
    }

    /// 发送事件；写任务已退出时返回 false / Send an event; false once the writer is gone
    pub fn send(&self, event: &ServerEvent) -> bool {
        self.sender.send(WsMessage::Text(event.to_text())).is_ok()
    }

    pub fn close(&self, reason: &str) -> bool {
        self.sender
            .send(WsMessage::Close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: reason.to_string().into(),
            })))
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

struct PresenceEntry {
    connections: HashMap<String, ConnectionHandle>,
    profile: ProfileSnapshot,
    last_seen: DateTime<Utc>,
    /// 观察者眼中是否在线 / Whether observers currently see the user online
    announced: bool,
    /// 宽限期定时器（代号，任务）/ Pending grace timer (generation, task)
    grace: Option<(u64, JoinHandle<()>)>,
}

/// 注册结果 / Outcome of `register`
#[derive(Debug)]
pub struct Registered {
    /// 是否向观察者广播了上线 / Whether an online event was broadcast
    pub came_online: bool,
    /// 当前在线列表（给新连接）/ Current online list for the new connection
    pub snapshot: Vec<OnlineUser>,
}

/// 注销结果 / Outcome of `unregister`
#[derive(Debug, PartialEq, Eq)]
pub enum Unregistered {
    /// 用户仍有其他连接 / other connections remain
    StillConnected,
    /// 最后一个连接已断开 / that was the last live connection
    LastConnection,
    Unknown,
}

pub struct PresenceDirectory {
    entries: DashMap<String, PresenceEntry>,
    grace: Duration,
    /// 串行化上线/离线转换，保证观察者看到的顺序
    /// Serialises online/offline transitions so observers see them in order
    transitions: Mutex<()>,
    generation: AtomicU64,
}

impl PresenceDirectory {
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            grace,
            transitions: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// 注册连接；首个连接会向其他用户广播上线
    /// Add a connection; the user's first one broadcasts `user_online` to everyone else
    pub fn register(&self, user_id: &str, handle: ConnectionHandle, profile: ProfileSnapshot) -> Registered {
        let _order = self.transitions.lock();
        let now = Utc::now();
        let came_online = {
            let mut entry = self.entries.entry(user_id.to_string()).or_insert_with(|| PresenceEntry {
                connections: HashMap::new(),
                profile: profile.clone(),
                last_seen: now,
                announced: false,
                grace: None,
            });
            if let Some((_, timer)) = entry.grace.take() {
                timer.abort();
                debug!(user_id, "⏳ grace timer cancelled by reconnect");
            }
            entry.connections.insert(handle.client_id.clone(), handle);
            entry.profile = profile.clone();
            entry.last_seen = now;
            let first = !entry.announced;
            entry.announced = true;
            first
        };
        if came_online {
            info!(user_id, "🟢 user online");
            let event = ServerEvent::UserOnline(OnlineUser {
                user_id: user_id.to_string(),
                profile,
                last_seen: now.timestamp_millis(),
            });
            self.broadcast_except(user_id, &event);
        }
        Registered {
            came_online,
            snapshot: self.snapshot(),
        }
    }

    /// 注销连接；最后一个连接断开时启动宽限期定时器
    /// Remove a connection; the last one starts the grace timer
    pub fn unregister(self: &Arc<Self>, user_id: &str, client_id: &str) -> Unregistered {
        let _order = self.transitions.lock();
        let now = Utc::now();
        let outcome = {
            let Some(mut entry) = self.entries.get_mut(user_id) else {
                return Unregistered::Unknown;
            };
            if entry.connections.remove(client_id).is_none() {
                return Unregistered::Unknown;
            }
            entry.last_seen = now;
            if !entry.connections.is_empty() {
                return Unregistered::StillConnected;
            }
            if !self.grace.is_zero() {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let directory = Arc::clone(self);
                let user = user_id.to_string();
                let grace = self.grace;
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    directory.expire(&user, Some(generation));
                });
                if let Some((_, old)) = entry.grace.replace((generation, timer)) {
                    old.abort();
                }
            }
            Unregistered::LastConnection
        };
        if self.grace.is_zero() {
            self.go_offline(user_id, None);
        }
        outcome
    }

    /// 宽限期到期 / Grace window elapsed
    fn expire(&self, user_id: &str, generation: Option<u64>) {
        let _order = self.transitions.lock();
        self.go_offline(user_id, generation);
    }

    /// 调用方须持有 transitions 锁 / caller holds the transitions lock
    fn go_offline(&self, user_id: &str, generation: Option<u64>) {
        let removed = self.entries.remove_if(user_id, |_, entry| {
            let current = entry.grace.as_ref().map(|(g, _)| *g);
            entry.connections.is_empty() && (generation.is_none() || current == generation)
        });
        if let Some((_, entry)) = removed {
            if entry.announced {
                info!(user_id, "⚪ user offline");
                let event = ServerEvent::UserOffline {
                    user_id: user_id.to_string(),
                    last_seen: entry.last_seen.timestamp_millis(),
                };
                self.broadcast_except(user_id, &event);
            }
        }
    }

    /// 至少一个活连接即为在线 / Online iff at least one live connection
    pub fn is_online(&self, user_id: &str) -> bool {
        self.entries
            .get(user_id)
            .map(|e| !e.connections.is_empty())
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> Vec<OnlineUser> {
        let mut users: Vec<OnlineUser> = self
            .entries
            .iter()
            .filter(|e| !e.connections.is_empty())
            .map(|e| OnlineUser {
                user_id: e.key().clone(),
                profile: e.profile.clone(),
                last_seen: e.last_seen.timestamp_millis(),
            })
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    pub fn connections_of(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.entries
            .get(user_id)
            .map(|e| e.connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 投递到用户的全部活连接，返回成功数 / Deliver to every live connection, returns how many took it
    pub fn deliver(&self, user_id: &str, event: &ServerEvent) -> usize {
        let handles = self.connections_of(user_id);
        let delivered = handles.iter().filter(|h| h.send(event)).count();
        debug!(user_id, event = event.name(), delivered, "📤 deliver");
        delivered
    }

    /// 广播给除 `user_id` 外的所有在线用户 / Broadcast to every other online user
    pub fn broadcast_except(&self, user_id: &str, event: &ServerEvent) -> usize {
        // 先收集句柄，避免持有分片锁时发送 / collect first, never send under a shard lock
        let handles: Vec<ConnectionHandle> = self
            .entries
            .iter()
            .filter(|e| e.key() != user_id)
            .flat_map(|e| e.connections.values().cloned().collect::<Vec<_>>())
            .collect();
        handles.iter().filter(|h| h.send(event)).count()
    }

    pub fn online_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.connections.is_empty()).count()
    }

    pub fn connection_count(&self) -> usize {
        self.entries.iter().map(|e| e.connections.len()).sum()
    }
}
