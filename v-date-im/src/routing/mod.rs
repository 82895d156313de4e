//! 房间与路由 / Rooms and routing
//!
//! 一对用户的房间ID由两者排序后拼接得到，双方无需查询即可独立算出。
//! A pair's room id is the sorted pair joined by a delimiter, so both sides
//! compute it independently without a lookup.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{Identity, ServerEvent};
use crate::error::{ImError, ImResult};
use crate::presence::PresenceDirectory;
use crate::quota::QuotaLedger;

/// 房间ID分隔符 / Room id delimiter
pub const ROOM_DELIMITER: char = '#';

const MAX_USER_ID_LEN: usize = 128;

/// 规范化的房间ID：roomId(a, b) == roomId(b, a)
/// Canonical room id, symmetric in its arguments
pub fn room_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}{}{}", a, ROOM_DELIMITER, b)
    } else {
        format!("{}{}{}", b, ROOM_DELIMITER, a)
    }
}

/// 用户ID校验：非空、不含分隔符 / User ids must be non-empty and free of delimiters
pub fn validate_user_id(field: &str, id: &str) -> ImResult<()> {
    if id.trim().is_empty() {
        return Err(ImError::Validation(format!("{} is required", field)));
    }
    if id.len() > MAX_USER_ID_LEN || id.contains(ROOM_DELIMITER) || id.contains('/') {
        return Err(ImError::Validation(format!("{} is not a valid user id", field)));
    }
    Ok(())
}

/// 校验对端并返回房间ID / Validate a peer id and return the pair's room id
pub fn room_for(user_id: &str, peer_user_id: &str) -> ImResult<String> {
    validate_user_id("peer_user_id", peer_user_id)?;
    if user_id == peer_user_id {
        return Err(ImError::Validation("cannot open a conversation with yourself".to_string()));
    }
    Ok(room_id(user_id, peer_user_id))
}

/// 加入结果 / Join outcome
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Joined {
    pub room_id: String,
    pub peer_online: bool,
}

pub struct Router {
    presence: Arc<PresenceDirectory>,
    quota: Arc<QuotaLedger>,
    /// 房间 → 已加入的连接 / room → joined client ids
    rooms: DashMap<String, HashSet<String>>,
}

impl Router {
    pub fn new(presence: Arc<PresenceDirectory>, quota: Arc<QuotaLedger>) -> Self {
        Self {
            presence,
            quota,
            rooms: DashMap::new(),
        }
    }

    /// 加入会话：双方订阅有效，且发起方开通了消息功能
    /// Join: both subscriptions active and messaging enabled for the joiner
    pub async fn join(&self, identity: &Identity, client_id: &str, peer_user_id: &str) -> ImResult<Joined> {
        let user_id = identity.acting_user();
        let room = room_for(user_id, peer_user_id)?;
        self.quota.ensure_messaging_enabled(user_id).await?;
        self.quota.ensure_peer_active(peer_user_id).await?;

        self.rooms
            .entry(room.clone())
            .or_default()
            .insert(client_id.to_string());
        let peer_online = self.presence.is_online(peer_user_id);
        let notified = self.deliver_to_members(
            &room,
            peer_user_id,
            &ServerEvent::PeerJoined {
                room_id: room.clone(),
                user_id: user_id.to_string(),
            },
        );
        debug!(user_id, client_id, room_id = %room, peer_online, notified, "joined conversation");
        Ok(Joined {
            room_id: room,
            peer_online,
        })
    }

    /// 投递到目标用户的全部活连接；离线时事件已由调用方先行持久化
    /// Deliver to every live connection of the target; persistence already happened upstream
    pub fn deliver(&self, event: &ServerEvent, target_user_id: &str) -> usize {
        self.presence.deliver(target_user_id, event)
    }

    /// 需要即时性的事件：对方离线直接失败 / Immediate events fail fast when the peer is offline
    pub fn deliver_now(&self, event: &ServerEvent, target_user_id: &str) -> ImResult<usize> {
        match self.presence.deliver(target_user_id, event) {
            0 => Err(ImError::PeerUnavailable(format!("{} is not online", target_user_id))),
            n => Ok(n),
        }
    }

    /// 只投递给目标用户已加入该房间的连接 / Deliver only to the target's connections that joined the room
    pub fn deliver_to_members(&self, room: &str, target_user_id: &str, event: &ServerEvent) -> usize {
        // 先拷出成员，不在分片锁内发送 / copy members out, never send under a shard lock
        let members = match self.rooms.get(room) {
            Some(members) => members.clone(),
            None => return 0,
        };
        self.presence
            .connections_of(target_user_id)
            .iter()
            .filter(|h| members.contains(&h.client_id))
            .filter(|h| h.send(event))
            .count()
    }

    /// 连接关闭时离开所有房间 / Leave every room when a connection closes
    pub fn leave_all(&self, client_id: &str) {
        self.rooms.retain(|_, members| {
            members.remove(client_id);
            !members.is_empty()
        });
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Allowances, ProfileSnapshot, Role, Usage};
    use crate::presence::ConnectionHandle;
    use crate::quota::test_support::subscription;
    use crate::quota::QuotaPolicy;
    use crate::storage::{MemoryStore, SubscriptionStore};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[test]
    fn room_id_is_symmetric() {
        let pairs = [("alice", "bob"), ("u-10", "u-9"), ("Z", "a"), ("same-prefix", "same")];
        for (a, b) in pairs {
            assert_eq!(room_id(a, b), room_id(b, a));
            let room = room_id(a, b);
            let (x, y) = room.split_once(ROOM_DELIMITER).unwrap();
            assert!(x <= y);
            assert!((x == a && y == b) || (x == b && y == a));
        }
        assert_eq!(room_id("bob", "alice"), "alice#bob");
    }

    #[test]
    fn user_ids_with_delimiters_are_rejected() {
        assert!(room_for("alice", "").is_err());
        assert!(room_for("alice", "b#c").is_err());
        assert!(room_for("alice", "b/c").is_err());
        assert!(matches!(room_for("alice", "alice"), Err(ImError::Validation(_))));
        assert_eq!(room_for("alice", "bob").unwrap(), "alice#bob");
    }

    async fn router() -> (Router, Arc<PresenceDirectory>) {
        let store = Arc::new(MemoryStore::new());
        store
            .replace_for_user(subscription("s-a", "alice", Allowances::default(), Usage::default()))
            .await
            .unwrap();
        store
            .replace_for_user(subscription(
                "s-b",
                "bob",
                Allowances {
                    messages: Some(0),
                    ..Allowances::default()
                },
                Usage::default(),
            ))
            .await
            .unwrap();
        store
            .replace_for_user(subscription("s-c", "carol", Allowances::default(), Usage::default()))
            .await
            .unwrap();
        let quota = Arc::new(QuotaLedger::new(store, QuotaPolicy::Enforcing));
        let presence = Arc::new(PresenceDirectory::new(Duration::from_secs(30)));
        (Router::new(presence.clone(), quota), presence)
    }

    fn real(user: &str) -> Identity {
        Identity::Real {
            user_id: user.to_string(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn join_notifies_peer_connections_in_the_room() {
        let (router, presence) = router().await;
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        presence.register("carol", ConnectionHandle::new("c-1", tx1), ProfileSnapshot::default());
        presence.register("carol", ConnectionHandle::new("c-2", tx2), ProfileSnapshot::default());

        // carol 只有 c-1 进了房间 / only carol's c-1 is in the room
        let first = router.join(&real("carol"), "c-1", "alice").await.unwrap();
        assert!(!first.peer_online);

        let joined = router.join(&real("alice"), "a-1", "carol").await.unwrap();
        assert_eq!(joined.room_id, "alice#carol");
        assert!(joined.peer_online);
        let text = match rx1.try_recv().unwrap() {
            tokio_tungstenite::tungstenite::Message::Text(t) => t,
            other => panic!("unexpected frame {:?}", other),
        };
        assert!(text.contains("peer_joined"));
        assert!(rx2.try_recv().is_err());

        router.leave_all("c-1");
        assert_eq!(router.deliver_to_members("alice#carol", "carol", &ServerEvent::Pong { timestamp: 0 }), 0);
        router.leave_all("a-1");
        assert_eq!(router.room_count(), 0);
    }

    #[tokio::test]
    async fn join_requires_subscriptions_and_enabled_messaging() {
        let (router, _) = router().await;
        // bob 的套餐不含消息 / bob's plan has messaging disabled
        assert!(matches!(
            router.join(&real("bob"), "b-1", "alice").await,
            Err(ImError::QuotaExceeded(_))
        ));
        assert!(matches!(
            router.join(&real("alice"), "a-1", "nobody").await,
            Err(ImError::Subscription(_))
        ));
        assert!(router.join(&real("alice"), "a-1", "bob").await.is_ok());
        assert!(matches!(
            router.deliver_now(&ServerEvent::Pong { timestamp: 0 }, "bob"),
            Err(ImError::PeerUnavailable(_))
        ));
    }
}
