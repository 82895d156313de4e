use anyhow::{anyhow, Result};
use std::str::FromStr;
use std::time::Duration;

use crate::quota::QuotaPolicy;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub ws_port: u16,
    pub http_port: u16,
    /// 心跳空闲超时 / Heartbeat idle timeout
    pub timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub center_url: String,
    pub timeout_ms: u64,
    /// 未认证连接最长存活时间 / How long an unauthenticated socket may stay open
    pub deadline_ms: u64,
}

#[derive(Clone, Debug)]
pub struct CallsConfig {
    pub settle_on_signal_end: bool,
    pub webhook_secret: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sled,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "sled" => Ok(StorageBackend::Sled),
            other => Err(anyhow::anyhow!("unknown storage.backend '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: String,
}

/// 启动时一次性读取的完整配置 / Full configuration, read once at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub presence_grace: Duration,
    pub quota_policy: QuotaPolicy,
    pub calls: CallsConfig,
    pub storage: StorageConfig,
    /// 内部推送接口令牌，未配置则接口关闭 / Internal push token; unset disables the endpoints
    pub internal_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                ws_port: 5200,
                http_port: 8080,
                timeout_ms: 30_000,
            },
            auth: AuthConfig {
                center_url: "http://127.0.0.1:8090".to_string(),
                timeout_ms: 1000,
                deadline_ms: 3000,
            },
            presence_grace: Duration::from_millis(30_000),
            quota_policy: QuotaPolicy::Enforcing,
            calls: CallsConfig {
                settle_on_signal_end: true,
                webhook_secret: None,
            },
            storage: StorageConfig {
                backend: StorageBackend::Sled,
                path: format!("{}/data/v-date-im", env!("CARGO_MANIFEST_DIR")),
            },
            internal_token: None,
        }
    }
}

/// 端口必须落在 u16 范围内 / Ports must fit in a u16
fn port(key: &str, raw: i64) -> Result<u16> {
    u16::try_from(raw).map_err(|_| anyhow!("配置 '{}' 超出端口范围 / '{}' is not a valid port: {}", key, key, raw))
}

/// 毫秒值不能为负 / Millisecond values must not be negative
fn millis(key: &str, raw: i64) -> Result<u64> {
    u64::try_from(raw).map_err(|_| anyhow!("配置 '{}' 不能为负 / '{}' must not be negative: {}", key, key, raw))
}

/// 从全局配置管理器读取 / Read from the process-wide config manager
pub fn load() -> Result<AppConfig> {
    let cm = v::get_global_config_manager()?;
    let d = AppConfig::default();
    let int = |key: &str, default: u64| -> i64 { cm.get_or(key, i64::try_from(default).unwrap_or(i64::MAX)) };
    let policy: String = cm.get_or("quota.policy", "enforcing".to_string());
    let backend: String = cm.get_or("storage.backend", "sled".to_string());
    Ok(AppConfig {
        server: ServerConfig {
            host: cm.get_or("server.host", d.server.host),
            ws_port: port("server.ws_port", int("server.ws_port", d.server.ws_port.into()))?,
            http_port: port("server.http_port", int("server.http_port", d.server.http_port.into()))?,
            timeout_ms: millis("server.timeout_ms", int("server.timeout_ms", d.server.timeout_ms))?,
        },
        auth: AuthConfig {
            center_url: cm.get_or("auth.center_url", d.auth.center_url),
            timeout_ms: millis("auth.timeout_ms", int("auth.timeout_ms", d.auth.timeout_ms))?,
            deadline_ms: millis("auth.deadline_ms", int("auth.deadline_ms", d.auth.deadline_ms))?,
        },
        presence_grace: Duration::from_millis(millis(
            "presence.grace_ms",
            int("presence.grace_ms", d.presence_grace.as_millis() as u64),
        )?),
        quota_policy: policy.parse::<QuotaPolicy>().map_err(anyhow::Error::msg)?,
        calls: CallsConfig {
            settle_on_signal_end: cm.get_or("calls.settle_on_signal_end", true),
            webhook_secret: cm.get::<String>("calls.webhook_secret").ok().filter(|s| !s.is_empty()),
        },
        storage: StorageConfig {
            backend: backend.parse::<StorageBackend>()?,
            path: cm.get_or("storage.path", d.storage.path),
        },
        internal_token: cm.get::<String>("internal.token").ok().filter(|s| !s.is_empty()),
    })
}
