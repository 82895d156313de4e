use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 投递状态（只能前进）/ Delivery status, only ever moves forward
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

/// 消息 / Message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Message {
    pub id: String,
    pub thread_key: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    /// 客户端关联ID，用于对齐乐观发送 / Client correlation id for optimistic sends
    pub client_correlation_id: String,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    /// 回复的父消息 / Parent message this one replies to
    #[serde(default)]
    pub reply_to: Option<String>,
    /// 代发时的监督者 / Supervising actor when sent through an impersonated identity
    #[serde(default)]
    pub actor_id: Option<String>,
}

impl Message {
    /// 推进状态；回退或原地不动返回 false
    /// Advance the status; returns false for a backwards or no-op transition
    pub fn advance(&mut self, to: DeliveryStatus, at: DateTime<Utc>) -> bool {
        if to <= self.status {
            return false;
        }
        self.status = to;
        if to == DeliveryStatus::Read {
            self.read_at = Some(at);
        }
        true
    }
}

/// 用户资料快照（用于在线状态负载）/ Profile snapshot carried in presence payloads
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProfileSnapshot {
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// 一对用户之间唯一的会话线程 / The one thread between a pair of users
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub key: String,
    pub participants: (String, String),
    /// 按持久化顺序 / In persistence order
    pub messages: Vec<Message>,
    /// 每个用户的“清空之前”时间点 / Per-user cleared-before marks
    #[serde(default)]
    pub cleared_before: HashMap<String, DateTime<Utc>>,
}

impl ConversationThread {
    pub fn new(key: String, a: &str, b: &str) -> Self {
        Self {
            key,
            participants: (a.to_string(), b.to_string()),
            messages: Vec::new(),
            cleared_before: HashMap::new(),
        }
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.0 == user_id || self.participants.1 == user_id
    }

    /// 该用户可见的消息（清空点之后）/ Messages visible to `user_id` after its cleared-before mark
    pub fn visible_to(&self, user_id: &str) -> Vec<&Message> {
        match self.cleared_before.get(user_id) {
            Some(mark) => self.messages.iter().filter(|m| m.created_at > *mark).collect(),
            None => self.messages.iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn msg(id: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            thread_key: "a#b".to_string(),
            sender_id: "a".to_string(),
            recipient_id: "b".to_string(),
            body: "hi".to_string(),
            created_at: at,
            client_correlation_id: format!("c-{}", id),
            status: DeliveryStatus::Sent,
            read_at: None,
            reply_to: None,
            actor_id: None,
        }
    }

    #[test]
    fn status_never_moves_backwards() {
        let now = Utc::now();
        let mut m = msg("m1", now);
        assert!(m.advance(DeliveryStatus::Read, now));
        assert_eq!(m.read_at, Some(now));
        assert!(!m.advance(DeliveryStatus::Delivered, now));
        assert_eq!(m.status, DeliveryStatus::Read);
    }

    #[test]
    fn cleared_before_hides_history_for_one_side_only() {
        let t0 = Utc::now();
        let mut thread = ConversationThread::new("a#b".to_string(), "a", "b");
        thread.messages.push(msg("m1", t0));
        thread.messages.push(msg("m2", t0 + Duration::seconds(10)));
        thread.cleared_before.insert("b".to_string(), t0 + Duration::seconds(5));

        let for_b: Vec<_> = thread.visible_to("b").iter().map(|m| m.id.clone()).collect();
        let for_a: Vec<_> = thread.visible_to("a").iter().map(|m| m.id.clone()).collect();
        assert_eq!(for_b, vec!["m2"]);
        assert_eq!(for_a, vec!["m1", "m2"]);
        assert_eq!(thread.messages.len(), 2);
    }
}
