use anyhow::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::config::{AppConfig, StorageBackend};
use crate::presence::{ConnectionHandle, PresenceDirectory};
use crate::quota::{CallUsageLedger, QuotaLedger};
use crate::routing::Router;
use crate::service::auth::{Authenticator, CenterAuthenticator};
use crate::service::calls::CallCoordinator;
use crate::service::chat::ChatService;
use crate::storage::{SledStore, Stores};

/// 客户端连接信息 / Client connection information
#[derive(Clone)]
pub struct Connection {
    pub client_id: String,
    pub addr: SocketAddr,
    pub handle: ConnectionHandle,
    /// 认证后的对外身份 / Acting user once authenticated
    pub user_id: Option<String>,
    pub last_heartbeat: Arc<Mutex<Instant>>,
    /// 通知读循环退出（心跳超时、认证超时）/ Tells the reader loop to stop
    pub kick: Arc<Notify>,
}

impl Connection {
    pub fn new(client_id: &str, addr: SocketAddr, handle: ConnectionHandle) -> Self {
        Self {
            client_id: client_id.to_string(),
            addr,
            handle,
            user_id: None,
            last_heartbeat: Arc::new(Mutex::new(Instant::now())),
            kick: Arc::new(Notify::new()),
        }
    }
}

/// 服务端全局状态（组合根）/ Server global state, the composition root
#[derive(Clone)]
pub struct VDateIMServer {
    pub config: Arc<AppConfig>,
    pub connections: Arc<DashMap<String, Connection>>, // 客户端连接 / Client connections
    pub presence: Arc<PresenceDirectory>,
    pub quota: Arc<QuotaLedger>,
    pub call_usage: Arc<CallUsageLedger>,
    pub router: Arc<Router>,
    pub chat: Arc<ChatService>,
    pub calls: Arc<CallCoordinator>,
    pub stores: Stores,
    pub authenticator: Arc<dyn Authenticator>,
}

impl VDateIMServer {
    /// 由配置、存储与鉴权协作者装配 / Wire everything from config, stores and the authenticator
    pub fn new(config: AppConfig, stores: Stores, authenticator: Arc<dyn Authenticator>) -> Self {
        let presence = Arc::new(PresenceDirectory::new(config.presence_grace));
        let quota = Arc::new(QuotaLedger::new(stores.subscriptions.clone(), config.quota_policy));
        let call_usage = Arc::new(CallUsageLedger::new(quota.clone()));
        let router = Arc::new(Router::new(presence.clone(), quota.clone()));
        let chat = Arc::new(ChatService::new(&stores, quota.clone(), router.clone()));
        let calls = Arc::new(CallCoordinator::new(
            call_usage.clone(),
            presence.clone(),
            config.calls.settle_on_signal_end,
        ));
        info!(
            backend = stores.backend,
            policy = ?config.quota_policy,
            grace_ms = config.presence_grace.as_millis() as u64,
            "🧩 v-date-im core assembled"
        );
        Self {
            config: Arc::new(config),
            connections: Arc::new(DashMap::new()),
            presence,
            quota,
            call_usage,
            router,
            chat,
            calls,
            stores,
            authenticator,
        }
    }

    /// 按配置打开存储并连接鉴权中心 / Open the configured store and the auth center client
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let stores = match config.storage.backend {
            StorageBackend::Memory => Stores::memory(),
            StorageBackend::Sled => {
                info!(path = %config.storage.path, "💾 opening sled store");
                Stores::sled(SledStore::open(&config.storage.path)?)
            }
        };
        let authenticator: Arc<dyn Authenticator> =
            Arc::new(CenterAuthenticator::new(&config.auth.center_url, config.auth.timeout_ms)?);
        Ok(Self::new(config, stores, authenticator))
    }

    /// 更新心跳时间 / Update heartbeat time
    pub fn update_heartbeat(&self, client_id: &str) {
        if let Some(conn) = self.connections.get(client_id) {
            *conn.last_heartbeat.lock() = Instant::now();
        }
    }

    /// 认证成功后记录对外身份 / Record the acting user after authentication
    pub fn bind_user(&self, client_id: &str, user_id: &str) {
        if let Some(mut conn) = self.connections.get_mut(client_id) {
            conn.user_id = Some(user_id.to_string());
        }
    }

    /// 关闭超时连接 / Close connections idle longer than `timeout_ms`
    pub async fn cleanup_timeout_connections(&self, timeout_ms: u64) -> usize {
        let timed_out: Vec<String> = self
            .connections
            .iter()
            .filter(|c| c.last_heartbeat.lock().elapsed().as_millis() as u64 > timeout_ms)
            .map(|c| c.key().clone())
            .collect();
        for client_id in &timed_out {
            warn!(client_id = %client_id, timeout_ms, "💔 heartbeat timeout, closing connection");
            self.close_client(client_id, "heartbeat timeout");
        }
        timed_out.len()
    }
}
