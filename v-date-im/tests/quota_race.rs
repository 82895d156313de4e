//! 并发扣减测试（内存与 sled 两种后端）/ Concurrent debit tests on both backends

mod common;

use anyhow::Result;
use std::sync::Arc;

use common::*;
use v_date_im::domain::{Allowances, CallType, ResourceKind};
use v_date_im::quota::{CallUsageLedger, QuotaDecision, QuotaLedger, QuotaPolicy};
use v_date_im::storage::{SledStore, SubscriptionStore};
use v_date_im::ImError;

const ATTEMPTS: usize = 32;
const ALLOWED: u64 = 10;

async fn race(store: Arc<dyn SubscriptionStore>) -> Result<(usize, usize)> {
    store
        .replace_for_user(subscription("s-a", "alice", messages(Some(ALLOWED))))
        .await?;
    let ledger = Arc::new(QuotaLedger::new(store, QuotaPolicy::Enforcing));
    let mut tasks = Vec::with_capacity(ATTEMPTS);
    for _ in 0..ATTEMPTS {
        let ledger = ledger.clone();
        tasks.push(tokio::spawn(async move {
            ledger.check_and_reserve("s-a", ResourceKind::Message, 1).await
        }));
    }
    let (mut granted, mut denied) = (0, 0);
    for t in tasks {
        match t.await?? {
            QuotaDecision::Granted { .. } => granted += 1,
            QuotaDecision::Denied(_) => denied += 1,
        }
    }
    Ok((granted, denied))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_memory_store_never_overgrants() -> Result<()> {
    let store: Arc<dyn SubscriptionStore> = Arc::new(v_date_im::storage::MemoryStore::new());
    let (granted, denied) = race(store.clone()).await?;
    assert_eq!(granted as u64, ALLOWED);
    assert_eq!(denied, ATTEMPTS - ALLOWED as usize);
    let sub = store.find_by_id("s-a").await?.expect("seeded");
    assert_eq!(sub.usage.messages, ALLOWED);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_sled_store_never_overgrants() -> Result<()> {
    let store: Arc<dyn SubscriptionStore> = Arc::new(SledStore::open_temporary()?);
    let (granted, _) = race(store.clone()).await?;
    assert_eq!(granted as u64, ALLOWED);
    let sub = store.find_by_id("s-a").await?.expect("seeded");
    assert_eq!(sub.usage.messages, ALLOWED);
    Ok(())
}

#[tokio::test]
async fn test_sled_usage_survives_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("quota");
    let path = path.to_str().expect("utf-8 temp path");
    {
        let store: Arc<dyn SubscriptionStore> = Arc::new(SledStore::open(path)?);
        store
            .replace_for_user(subscription("s-a", "alice", messages(Some(3))))
            .await?;
        let ledger = QuotaLedger::new(store, QuotaPolicy::Enforcing);
        ledger.reserve_for_user("alice", ResourceKind::Message, 1).await?;
        ledger.reserve_for_user("alice", ResourceKind::Message, 1).await?;
    }
    let store: Arc<dyn SubscriptionStore> = Arc::new(SledStore::open(path)?);
    let sub = store.find_active_by_user("alice").await?.expect("persisted");
    assert_eq!(sub.usage.messages, 2);
    Ok(())
}

#[tokio::test]
async fn test_expired_or_missing_subscription_fails_closed() -> Result<()> {
    let store: Arc<dyn SubscriptionStore> = Arc::new(v_date_im::storage::MemoryStore::new());
    store.replace_for_user(expired("s-old", "bob")).await?;
    let ledger = Arc::new(QuotaLedger::new(store.clone(), QuotaPolicy::Enforcing));

    assert!(matches!(
        ledger.reserve_for_user("bob", ResourceKind::Message, 1).await,
        Err(ImError::Subscription(_))
    ));
    assert!(matches!(
        ledger.reserve_for_user("nobody", ResourceKind::Message, 1).await,
        Err(ImError::Subscription(_))
    ));
    let calls = CallUsageLedger::new(ledger.clone());
    assert!(calls.start_call("bob", CallType::Video).await?.into_result(CallType::Video).is_err());

    // 放行模式不查存储也不扣减 / the permissive policy neither reads nor debits
    let permissive = QuotaLedger::new(store.clone(), QuotaPolicy::Permissive);
    let reservation = permissive.reserve_for_user("nobody", ResourceKind::Message, 1).await?;
    assert!(!reservation.debited);
    assert_eq!(reservation.remaining, None);
    Ok(())
}

#[tokio::test]
async fn test_replacement_resets_usage() -> Result<()> {
    let store: Arc<dyn SubscriptionStore> = Arc::new(v_date_im::storage::MemoryStore::new());
    store
        .replace_for_user(subscription("s-1", "carol", messages(Some(1))))
        .await?;
    let ledger = QuotaLedger::new(store.clone(), QuotaPolicy::Enforcing);
    ledger.reserve_for_user("carol", ResourceKind::Message, 1).await?;
    assert!(matches!(
        ledger.reserve_for_user("carol", ResourceKind::Message, 1).await,
        Err(ImError::QuotaExceeded(_))
    ));

    store
        .replace_for_user(subscription(
            "s-2",
            "carol",
            Allowances {
                messages: Some(5),
                ..Allowances::default()
            },
        ))
        .await?;
    let reservation = ledger.reserve_for_user("carol", ResourceKind::Message, 1).await?;
    assert_eq!(reservation.subscription_id.as_deref(), Some("s-2"));
    assert_eq!(reservation.remaining, Some(4));
    Ok(())
}
