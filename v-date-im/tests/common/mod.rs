//! 集成测试公共装配 / Shared fixtures for the integration tests
#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use v_date_im::config::{AppConfig, StorageBackend};
use v_date_im::domain::{Allowances, Identity, PlanType, Role, Subscription, Usage};
use v_date_im::service::auth::StaticAuthenticator;
use v_date_im::storage::Stores;
use v_date_im::VDateIMServer;

pub const INTERNAL_TOKEN: &str = "internal-secret";
pub const WEBHOOK_SECRET: &str = "hook-secret";

pub fn token(user: &str) -> String {
    format!("tok-{}", user)
}

pub fn subscription(id: &str, user: &str, allowances: Allowances) -> Subscription {
    let now = Utc::now();
    Subscription {
        id: id.to_string(),
        user_id: user.to_string(),
        plan_id: format!("plan-{}", id),
        plan_type: PlanType::Standard,
        start_at: now - ChronoDuration::days(1),
        end_at: now + ChronoDuration::days(30),
        allowances,
        usage: Usage::default(),
    }
}

pub fn expired(id: &str, user: &str) -> Subscription {
    let mut sub = subscription(id, user, Allowances::default());
    sub.end_at = Utc::now() - ChronoDuration::minutes(1);
    sub
}

pub fn messages(n: Option<u64>) -> Allowances {
    Allowances {
        messages: n,
        audio_seconds: Some(600),
        video_seconds: Some(600),
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.backend = StorageBackend::Memory;
    config.presence_grace = Duration::from_millis(300);
    config.auth.deadline_ms = 500;
    config.internal_token = Some(INTERNAL_TOKEN.to_string());
    config.calls.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    config
}

/// 每个用户一个令牌 `tok-<user>`，另加一个过期令牌与一个代理子账号令牌
/// One `tok-<user>` token per user, plus an expired token and an agent sub-identity token
pub fn authenticator(users: &[&str]) -> Arc<StaticAuthenticator> {
    let mut auth = StaticAuthenticator::new().with_expired("tok-expired").with_identity(
        "tok-agent-as-persona",
        Identity::Impersonated {
            sub_user_id: "persona".to_string(),
            supervisor_id: "agent".to_string(),
        },
    );
    for user in users {
        auth = auth.with_identity(
            &token(user),
            Identity::Real {
                user_id: user.to_string(),
                role: Role::User,
            },
        );
    }
    Arc::new(auth)
}

pub fn server_with(stores: Stores, users: &[&str]) -> VDateIMServer {
    VDateIMServer::new(test_config(), stores, authenticator(users))
}

pub async fn seeded_server(subs: Vec<Subscription>) -> VDateIMServer {
    let stores = Stores::memory();
    let users: Vec<String> = subs.iter().map(|s| s.user_id.clone()).collect();
    for sub in subs {
        stores.subscriptions.replace_for_user(sub).await.expect("seed subscription");
    }
    let names: Vec<&str> = users.iter().map(String::as_str).collect();
    server_with(stores, &names)
}

pub fn real(user: &str) -> Identity {
    Identity::Real {
        user_id: user.to_string(),
        role: Role::User,
    }
}
