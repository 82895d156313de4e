//! 存储协作者接口 / Storage collaborator interfaces
//!
//! 订阅存储、消息存储与用户目录均以 trait 表达，核心只依赖这些接口。
//! 内置两种实现：进程内（dashmap）与持久化（sled）。
//! Subscription store, message store and user directory are traits; the core
//! depends only on these. Two implementations ship: in-process and sled.

pub mod memory;
pub mod sled_store;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::{ConversationThread, DebitOutcome, Message, ProfileSnapshot, ResourceKind, Subscription};

pub use self::memory::MemoryStore;
pub use self::sled_store::SledStore;

/// 订阅存储 / Subscription store
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// 用户当前的订阅（可能已过期）/ The user's current subscription, expired or not
    async fn find_by_user(&self, user_id: &str) -> Result<Option<Subscription>>;

    async fn find_by_id(&self, subscription_id: &str) -> Result<Option<Subscription>>;

    /// 原子条件扣减：仅当结果不超额时生效
    /// Atomic conditional increment, applied only if the result stays within the allowance
    async fn atomic_debit(&self, subscription_id: &str, kind: ResourceKind, amount: u64) -> Result<DebitOutcome>;

    /// 无条件调整用量（负数为退还），返回调整后用量；订阅不存在时返回 None
    /// Unconditional usage adjustment (negative refunds); `None` when the subscription is gone
    async fn add_usage(&self, subscription_id: &str, kind: ResourceKind, delta: i64) -> Result<Option<u64>>;

    /// 新订阅整体替换旧订阅 / A new subscription replaces the previous one
    async fn replace_for_user(&self, subscription: Subscription) -> Result<()>;

    async fn find_active_by_user(&self, user_id: &str) -> Result<Option<Subscription>> {
        let now = Utc::now();
        Ok(self.find_by_user(user_id).await?.filter(|s| s.is_active_at(now)))
    }
}

/// 消息存储 / Message store
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 追加消息，返回服务端消息ID / Append and return the server message id
    async fn append(&self, thread_key: &str, message: Message) -> Result<String>;

    async fn find_thread(&self, user_a: &str, user_b: &str) -> Result<Option<ConversationThread>>;

    /// 标记已读，只处理收件人是 `reader_id` 的消息，返回实际被推进的消息
    /// Mark read; only messages addressed to `reader_id` are touched, the advanced ones are returned
    async fn mark_read(
        &self,
        thread_key: &str,
        reader_id: &str,
        message_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>>;

    async fn mark_delivered(&self, thread_key: &str, message_id: &str) -> Result<bool>;

    async fn set_cleared_before(&self, thread_key: &str, user_id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// 用户目录 / User directory
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_profile_snapshot(&self, user_id: &str) -> Result<Option<ProfileSnapshot>>;

    async fn put_profile(&self, user_id: &str, profile: ProfileSnapshot) -> Result<()>;
}

/// 存储集合 / The three collaborators bundled for the composition root
#[derive(Clone)]
pub struct Stores {
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub messages: Arc<dyn MessageStore>,
    pub users: Arc<dyn UserDirectory>,
    pub backend: &'static str,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            subscriptions: store.clone(),
            messages: store.clone(),
            users: store,
            backend: "memory",
        }
    }

    pub fn sled(store: SledStore) -> Self {
        let store = Arc::new(store);
        Self {
            subscriptions: store.clone(),
            messages: store.clone(),
            users: store,
            backend: "sled",
        }
    }
}
