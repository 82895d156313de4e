// v 库主入口：配置、日志、HTTP 错误模型与健康检查
// v library entry: configuration, logging, HTTP error model and health checks

pub mod comm;
pub use crate::comm::config::*;
pub use crate::comm::tracing::init_tracing;

pub mod http;
#[cfg(feature = "web_actix")]
pub mod response;

// 重新导出 tracing 宏 / Re-export tracing macros
pub use tracing::{debug, error, info, trace, warn};

use async_trait::async_trait;

/// 健康状态：表示单个组件当前的健康状况
/// Health status of a single component
#[derive(Debug, serde::Serialize)]
pub struct HealthStatus {
    /// 组件名称 / Component name, e.g. `presence`, `subscription_store`
    pub component: String,
    pub healthy: bool,
    /// 附加信息 / Free-form details (counters, error text)
    pub details: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthStatus {
    pub fn new(component: impl Into<String>, healthy: bool, details: serde_json::Value) -> Self {
        Self {
            component: component.into(),
            healthy,
            details,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// 健康检查通用接口 / Generic health check interface
#[async_trait]
pub trait HealthCheck {
    async fn check_health(&self) -> HealthStatus;
}
