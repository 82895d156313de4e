use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::collections::{HashMap, HashSet};

use super::{MessageStore, SubscriptionStore, UserDirectory};
use crate::domain::{
    ConversationThread, DebitOutcome, DeliveryStatus, Message, ProfileSnapshot, ResourceKind, Subscription,
};
use crate::routing::room_id;

/// 线程元数据（消息单独存放）/ Thread metadata; messages live in their own tree
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ThreadMeta {
    participants: (String, String),
    #[serde(default)]
    cleared_before: HashMap<String, DateTime<Utc>>,
}

/// sled 持久化存储 / sled-backed durable store
///
/// 键设计 / key layout:
/// - `subscriptions`: `{subscription_id}` → Subscription
/// - `user_subscriptions`: `{user_id}` → subscription id
/// - `threads`: `{thread_key}` → ThreadMeta
/// - `messages`: `{thread_key}/{seq:020}` → Message（seq 单调递增，保证持久化顺序）
/// - `message_index`: `{message_id}` → messages 键 / key in `messages`
/// - `profiles`: `{user_id}` → ProfileSnapshot
#[derive(Clone, Debug)]
pub struct SledStore {
    db: Db,
    subscriptions: Tree,
    user_subscriptions: Tree,
    threads: Tree,
    messages: Tree,
    message_index: Tree,
    profiles: Tree,
}

impl SledStore {
    pub fn open(path: &str) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    pub fn open_temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            subscriptions: db.open_tree("subscriptions")?,
            user_subscriptions: db.open_tree("user_subscriptions")?,
            threads: db.open_tree("threads")?,
            messages: db.open_tree("messages")?,
            message_index: db.open_tree("message_index")?,
            profiles: db.open_tree("profiles")?,
            db,
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(tree: &Tree, key: &str) -> Result<Option<T>> {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(tree: &Tree, key: &str, value: &T) -> Result<()> {
        tree.insert(key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    /// 对单条订阅执行原子读改写 / Atomic read-modify-write of one subscription record
    fn update_subscription<R, F>(&self, subscription_id: &str, mut apply: F) -> Result<Option<R>>
    where
        F: FnMut(&mut Subscription) -> R,
    {
        let mut result: Option<R> = None;
        let mut decode_error: Option<String> = None;
        self.subscriptions
            .fetch_and_update(subscription_id.as_bytes(), |current| {
                // 冲突时闭包会被重试，每次先复位 / the closure is retried on conflict, reset first
                result = None;
                decode_error = None;
                let bytes = current?;
                match serde_json::from_slice::<Subscription>(bytes) {
                    Ok(mut sub) => {
                        let r = apply(&mut sub);
                        match serde_json::to_vec(&sub) {
                            Ok(encoded) => {
                                result = Some(r);
                                Some(encoded)
                            }
                            Err(e) => {
                                decode_error = Some(e.to_string());
                                Some(bytes.to_vec())
                            }
                        }
                    }
                    Err(e) => {
                        decode_error = Some(e.to_string());
                        Some(bytes.to_vec())
                    }
                }
            })?;
        if let Some(e) = decode_error {
            return Err(anyhow!("corrupt subscription record {}: {}", subscription_id, e));
        }
        self.subscriptions.flush()?;
        Ok(result)
    }

    fn message_key(&self, message_id: &str) -> Result<Option<sled::IVec>> {
        Ok(self.message_index.get(message_id.as_bytes())?)
    }

    fn advance_message(&self, key: &[u8], to: DeliveryStatus, at: DateTime<Utc>, reader: Option<&str>) -> Result<Option<Message>> {
        let mut advanced: Option<Message> = None;
        self.messages.fetch_and_update(key, |current| {
            advanced = None;
            let bytes = current?;
            let mut message: Message = match serde_json::from_slice(bytes) {
                Ok(m) => m,
                Err(_) => return Some(bytes.to_vec()),
            };
            if reader.map_or(true, |r| message.recipient_id == r) && message.advance(to, at) {
                match serde_json::to_vec(&message) {
                    Ok(encoded) => {
                        advanced = Some(message);
                        Some(encoded)
                    }
                    Err(_) => Some(bytes.to_vec()),
                }
            } else {
                Some(bytes.to_vec())
            }
        })?;
        Ok(advanced)
    }
}

#[async_trait]
impl SubscriptionStore for SledStore {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<Subscription>> {
        match self.user_subscriptions.get(user_id.as_bytes())? {
            Some(id) => {
                let id = String::from_utf8(id.to_vec())?;
                Self::get_json(&self.subscriptions, &id)
            }
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        Self::get_json(&self.subscriptions, subscription_id)
    }

    async fn atomic_debit(&self, subscription_id: &str, kind: ResourceKind, amount: u64) -> Result<DebitOutcome> {
        Ok(self
            .update_subscription(subscription_id, |sub| sub.apply_debit(kind, amount))?
            .unwrap_or(DebitOutcome::Missing))
    }

    async fn add_usage(&self, subscription_id: &str, kind: ResourceKind, delta: i64) -> Result<Option<u64>> {
        self.update_subscription(subscription_id, |sub| sub.apply_usage_delta(kind, delta))
    }

    async fn replace_for_user(&self, subscription: Subscription) -> Result<()> {
        Self::put_json(&self.subscriptions, &subscription.id, &subscription)?;
        let previous = self
            .user_subscriptions
            .insert(subscription.user_id.as_bytes(), subscription.id.as_bytes())?;
        if let Some(old) = previous {
            if &old[..] != subscription.id.as_bytes() {
                self.subscriptions.remove(old)?;
            }
        }
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SledStore {
    async fn append(&self, thread_key: &str, message: Message) -> Result<String> {
        let meta = ThreadMeta {
            participants: (message.sender_id.clone(), message.recipient_id.clone()),
            cleared_before: HashMap::new(),
        };
        // 已存在则保留原元数据 / keep existing metadata
        let _ = self
            .threads
            .compare_and_swap(thread_key.as_bytes(), None as Option<&[u8]>, Some(serde_json::to_vec(&meta)?))?;

        let seq = self.db.generate_id()?;
        let key = format!("{}/{:020}", thread_key, seq);
        self.messages.insert(key.as_bytes(), serde_json::to_vec(&message)?)?;
        self.message_index.insert(message.id.as_bytes(), key.as_bytes())?;
        self.messages.flush()?;
        Ok(message.id)
    }

    async fn find_thread(&self, user_a: &str, user_b: &str) -> Result<Option<ConversationThread>> {
        let key = room_id(user_a, user_b);
        let Some(meta) = Self::get_json::<ThreadMeta>(&self.threads, &key)? else {
            return Ok(None);
        };
        let mut thread = ConversationThread::new(key.clone(), &meta.participants.0, &meta.participants.1);
        thread.cleared_before = meta.cleared_before;
        let prefix = format!("{}/", key);
        for item in self.messages.scan_prefix(prefix.as_bytes()) {
            let (_k, v) = item?;
            thread.messages.push(serde_json::from_slice(&v)?);
        }
        Ok(Some(thread))
    }

    async fn mark_read(
        &self,
        thread_key: &str,
        reader_id: &str,
        message_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let prefix = format!("{}/", thread_key);
        let mut seen = HashSet::new();
        let mut marked = Vec::new();
        for id in message_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let Some(key) = self.message_key(id)? else { continue };
            if !key.starts_with(prefix.as_bytes()) {
                continue;
            }
            if let Some(m) = self.advance_message(&key, DeliveryStatus::Read, at, Some(reader_id))? {
                marked.push(m);
            }
        }
        self.messages.flush()?;
        Ok(marked)
    }

    async fn mark_delivered(&self, thread_key: &str, message_id: &str) -> Result<bool> {
        let Some(key) = self.message_key(message_id)? else {
            return Ok(false);
        };
        if !key.starts_with(format!("{}/", thread_key).as_bytes()) {
            return Ok(false);
        }
        Ok(self
            .advance_message(&key, DeliveryStatus::Delivered, Utc::now(), None)?
            .is_some())
    }

    async fn set_cleared_before(&self, thread_key: &str, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let Some(mut meta) = Self::get_json::<ThreadMeta>(&self.threads, thread_key)? else {
            return Ok(());
        };
        if meta.participants.0 != user_id && meta.participants.1 != user_id {
            return Ok(());
        }
        meta.cleared_before.insert(user_id.to_string(), at);
        Self::put_json(&self.threads, thread_key, &meta)?;
        self.threads.flush()?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for SledStore {
    async fn get_profile_snapshot(&self, user_id: &str) -> Result<Option<ProfileSnapshot>> {
        Self::get_json(&self.profiles, user_id)
    }

    async fn put_profile(&self, user_id: &str, profile: ProfileSnapshot) -> Result<()> {
        Self::put_json(&self.profiles, user_id, &profile)?;
        self.profiles.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Allowances, PlanType, Usage};
    use chrono::Duration;

    fn subscription(id: &str, user: &str) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: id.to_string(),
            user_id: user.to_string(),
            plan_id: "standard".to_string(),
            plan_type: PlanType::Standard,
            start_at: now - Duration::days(1),
            end_at: now + Duration::days(30),
            allowances: Allowances {
                messages: Some(2),
                audio_seconds: None,
                video_seconds: Some(0),
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
            body: "hello".to_string(),
            created_at: Utc::now(),
            client_correlation_id: format!("c-{}", id),
            status: DeliveryStatus::Sent,
            read_at: None,
            reply_to: None,
            actor_id: None,
        }
    }

    #[tokio::test]
    async fn conditional_debit_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let path = path.to_str().unwrap();
        {
            let store = SledStore::open(path).unwrap();
            store.replace_for_user(subscription("s1", "alice")).await.unwrap();
            assert!(matches!(
                store.atomic_debit("s1", ResourceKind::Message, 2).await.unwrap(),
                DebitOutcome::Applied { used: 2, .. }
            ));
            assert!(matches!(
                store.atomic_debit("s1", ResourceKind::VideoSeconds, 1).await.unwrap(),
                DebitOutcome::Exceeded { allowed: 0, .. }
            ));
        }
        let store = SledStore::open(path).unwrap();
        let sub = store.find_by_user("alice").await.unwrap().unwrap();
        assert_eq!(sub.usage.messages, 2);
        assert_eq!(
            store.atomic_debit("s1", ResourceKind::Message, 1).await.unwrap(),
            DebitOutcome::Exceeded { used: 2, allowed: 2 }
        );
    }

    #[tokio::test]
    async fn thread_keeps_persistence_order_and_cleared_marks() {
        let store = SledStore::open_temporary().unwrap();
        let key = room_id("alice", "bob");
        for i in 0..12 {
            store.append(&key, message(&format!("m{}", i), "alice", "bob")).await.unwrap();
        }
        let thread = store.find_thread("bob", "alice").await.unwrap().unwrap();
        let ids: Vec<_> = thread.messages.iter().map(|m| m.id.clone()).collect();
        let expected: Vec<_> = (0..12).map(|i| format!("m{}", i)).collect();
        assert_eq!(ids, expected);

        let mark = Utc::now() + Duration::seconds(1);
        store.set_cleared_before(&key, "bob", mark).await.unwrap();
        store.set_cleared_before(&key, "mallory", mark).await.unwrap();
        let thread = store.find_thread("alice", "bob").await.unwrap().unwrap();
        assert!(thread.visible_to("bob").is_empty());
        assert_eq!(thread.visible_to("alice").len(), 12);
        assert!(!thread.cleared_before.contains_key("mallory"));
    }

    #[tokio::test]
    async fn read_receipts_move_status_forward_only() {
        let store = SledStore::open_temporary().unwrap();
        let key = room_id("alice", "bob");
        store.append(&key, message("m1", "alice", "bob")).await.unwrap();
        let ids = vec!["m1".to_string(), "m1".to_string()];
        assert!(store.mark_read(&key, "alice", &ids, Utc::now()).await.unwrap().is_empty());
        let marked = store.mark_read(&key, "bob", &ids, Utc::now()).await.unwrap();
        assert_eq!(marked.len(), 1);
        assert!(marked[0].read_at.is_some());
        assert!(!store.mark_delivered(&key, "m1").await.unwrap());
        assert!(!store.mark_delivered("other#room", "m1").await.unwrap());
    }

    #[tokio::test]
    async fn profiles_round_trip() {
        let store = SledStore::open_temporary().unwrap();
        assert!(store.get_profile_snapshot("alice").await.unwrap().is_none());
        store
            .put_profile(
                "alice",
                ProfileSnapshot {
                    name: "Alice".to_string(),
                    avatar: Some("https://cdn/a.png".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(store.get_profile_snapshot("alice").await.unwrap().unwrap().name, "Alice");
    }
}
