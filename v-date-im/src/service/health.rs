use async_trait::async_trait;
use serde_json::json;
use v::{HealthCheck, HealthStatus};

use crate::server::VDateIMServer;

// 为实时核心实现统一健康检查接口
// Implement the unified HealthCheck for the real-time core
#[async_trait]
impl HealthCheck for VDateIMServer {
    /// 连接、在线用户、房间、通话计数，以及订阅存储是否可读
    /// Connection, presence, room and call counters, plus whether the subscription store answers
    async fn check_health(&self) -> HealthStatus {
        let store = self.stores.subscriptions.find_by_user("__health__").await;
        let healthy = store.is_ok();
        HealthStatus::new(
            "v_date_im",
            healthy,
            json!({
                "connections": self.connections.len(),
                "online_users": self.presence.online_count(),
                "rooms": self.router.room_count(),
                "active_calls": self.calls.active_calls(),
                "storage_backend": self.stores.backend,
                "storage_error": store.err().map(|e| e.to_string()),
                "quota_policy": format!("{:?}", self.quota.policy()).to_lowercase(),
            }),
        )
    }
}
