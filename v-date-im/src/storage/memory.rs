use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;

use super::{MessageStore, SubscriptionStore, UserDirectory};
use crate::domain::{
    ConversationThread, DebitOutcome, DeliveryStatus, Message, ProfileSnapshot, ResourceKind, Subscription,
};
use crate::routing::room_id;

/// 进程内存储 / In-process store
///
/// 条件扣减在 DashMap 的单键写保护内完成，同一订阅的读改写天然串行。
/// The conditional debit runs under the map's per-key write guard, which
/// serialises read-modify-write on one subscription.
#[derive(Default)]
pub struct MemoryStore {
    subscriptions: DashMap<String, Subscription>, // 订阅ID → 订阅 / subscription id → subscription
    user_subscription: DashMap<String, String>,   // 用户 → 订阅ID / user → subscription id
    threads: DashMap<String, ConversationThread>,
    profiles: DashMap<String, ProfileSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<Subscription>> {
        let Some(sub_id) = self.user_subscription.get(user_id).map(|id| id.clone()) else {
            return Ok(None);
        };
        Ok(self.subscriptions.get(&sub_id).map(|s| s.clone()))
    }

    async fn find_by_id(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.get(subscription_id).map(|s| s.clone()))
    }

    async fn atomic_debit(&self, subscription_id: &str, kind: ResourceKind, amount: u64) -> Result<DebitOutcome> {
        match self.subscriptions.get_mut(subscription_id) {
            Some(mut sub) => Ok(sub.apply_debit(kind, amount)),
            None => Ok(DebitOutcome::Missing),
        }
    }

    async fn add_usage(&self, subscription_id: &str, kind: ResourceKind, delta: i64) -> Result<Option<u64>> {
        Ok(self
            .subscriptions
            .get_mut(subscription_id)
            .map(|mut sub| sub.apply_usage_delta(kind, delta)))
    }

    async fn replace_for_user(&self, subscription: Subscription) -> Result<()> {
        let user_id = subscription.user_id.clone();
        let new_id = subscription.id.clone();
        self.subscriptions.insert(new_id.clone(), subscription);
        if let Some(old_id) = self.user_subscription.insert(user_id, new_id.clone()) {
            if old_id != new_id {
                self.subscriptions.remove(&old_id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, thread_key: &str, message: Message) -> Result<String> {
        let id = message.id.clone();
        let mut thread = self.threads.entry(thread_key.to_string()).or_insert_with(|| {
            ConversationThread::new(thread_key.to_string(), &message.sender_id, &message.recipient_id)
        });
        thread.messages.push(message);
        Ok(id)
    }

    async fn find_thread(&self, user_a: &str, user_b: &str) -> Result<Option<ConversationThread>> {
        Ok(self.threads.get(&room_id(user_a, user_b)).map(|t| t.clone()))
    }

    async fn mark_read(
        &self,
        thread_key: &str,
        reader_id: &str,
        message_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let wanted: HashSet<&str> = message_ids.iter().map(String::as_str).collect();
        let Some(mut thread) = self.threads.get_mut(thread_key) else {
            return Ok(Vec::new());
        };
        let mut marked = Vec::new();
        for message in thread.messages.iter_mut() {
            if wanted.contains(message.id.as_str())
                && message.recipient_id == reader_id
                && message.advance(DeliveryStatus::Read, at)
            {
                marked.push(message.clone());
            }
        }
        Ok(marked)
    }

    async fn mark_delivered(&self, thread_key: &str, message_id: &str) -> Result<bool> {
        let Some(mut thread) = self.threads.get_mut(thread_key) else {
            return Ok(false);
        };
        Ok(thread
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .map(|m| m.advance(DeliveryStatus::Delivered, Utc::now()))
            .unwrap_or(false))
    }

    async fn set_cleared_before(&self, thread_key: &str, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut thread) = self.threads.get_mut(thread_key) {
            if thread.has_participant(user_id) {
                thread.cleared_before.insert(user_id.to_string(), at);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get_profile_snapshot(&self, user_id: &str) -> Result<Option<ProfileSnapshot>> {
        Ok(self.profiles.get(user_id).map(|p| p.clone()))
    }

    async fn put_profile(&self, user_id: &str, profile: ProfileSnapshot) -> Result<()> {
        self.profiles.insert(user_id.to_string(), profile);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Allowances, PlanType, Usage};
    use chrono::Duration;

    fn subscription(id: &str, user: &str, messages: Option<u64>) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: id.to_string(),
            user_id: user.to_string(),
            plan_id: "basic-monthly".to_string(),
            plan_type: PlanType::Basic,
            start_at: now - Duration::days(1),
            end_at: now + Duration::days(30),
            allowances: Allowances {
                messages,
                audio_seconds: Some(60),
                video_seconds: None,
            },
            usage: Usage::default(),
        }
    }

    fn message(id: &str, from: &str, to: &str) -> Message {
        Message {
            id: id.to_string(),
            thread_key: room_id(from, to),
            sender_id: from.to_string(),
            recipient_id: to.to_string(),
            body: format!("body {}", id),
            created_at: Utc::now(),
            client_correlation_id: format!("c-{}", id),
            status: DeliveryStatus::Sent,
            read_at: None,
            reply_to: None,
            actor_id: None,
        }
    }

    #[tokio::test]
    async fn replacing_a_subscription_drops_the_old_one() {
        let store = MemoryStore::new();
        store.replace_for_user(subscription("s1", "alice", Some(5))).await.unwrap();
        store.replace_for_user(subscription("s2", "alice", Some(50))).await.unwrap();
        assert_eq!(store.find_by_user("alice").await.unwrap().unwrap().id, "s2");
        assert!(store.find_by_id("s1").await.unwrap().is_none());
        assert_eq!(
            store.atomic_debit("s1", ResourceKind::Message, 1).await.unwrap(),
            DebitOutcome::Missing
        );
    }

    #[tokio::test]
    async fn refund_restores_usage_and_floors_at_zero() {
        let store = MemoryStore::new();
        store.replace_for_user(subscription("s1", "alice", Some(5))).await.unwrap();
        store.atomic_debit("s1", ResourceKind::Message, 2).await.unwrap();
        assert_eq!(store.add_usage("s1", ResourceKind::Message, -1).await.unwrap(), Some(1));
        assert_eq!(store.add_usage("s1", ResourceKind::Message, -10).await.unwrap(), Some(0));
        assert_eq!(store.add_usage("nope", ResourceKind::Message, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn mark_read_only_touches_messages_addressed_to_reader() {
        let store = MemoryStore::new();
        let key = room_id("alice", "bob");
        store.append(&key, message("m1", "alice", "bob")).await.unwrap();
        store.append(&key, message("m2", "bob", "alice")).await.unwrap();

        let ids = vec!["m1".to_string(), "m2".to_string()];
        let marked = store.mark_read(&key, "bob", &ids, Utc::now()).await.unwrap();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].id, "m1");
        // 重复标记不再返回 / a second mark returns nothing
        assert!(store.mark_read(&key, "bob", &ids, Utc::now()).await.unwrap().is_empty());

        let thread = store.find_thread("bob", "alice").await.unwrap().unwrap();
        assert_eq!(thread.messages[1].status, DeliveryStatus::Sent);
        assert!(!store.mark_delivered(&key, "m1").await.unwrap());
        assert!(store.mark_delivered(&key, "m2").await.unwrap());
    }
}
