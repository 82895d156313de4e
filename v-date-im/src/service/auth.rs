use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Identity, Role};
use crate::error::ImError;
use crate::routing::validate_user_id;

/// 鉴权失败原因（过期与无效可区分）/ Auth failures; expired and invalid are distinguishable
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,
    #[error("credential expired")]
    Expired,
    #[error("invalid credential: {0}")]
    Invalid(String),
    #[error("auth center unavailable: {0}")]
    Unavailable(String),
}

impl From<AuthError> for ImError {
    fn from(e: AuthError) -> Self {
        ImError::Authentication(e.to_string())
    }
}

/// 外部鉴权协作者 / External auth collaborator
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// 提取 Bearer 令牌 / Extract a bearer token from an Authorization header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .unwrap_or(header)
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// 鉴权中心响应 / Auth center response body
#[derive(Debug, Deserialize)]
struct CenterIdentity {
    user_id: String,
    #[serde(default)]
    role: Option<Role>,
    /// 代理通过子账号行事时存在 / present when an agent acts through a sub-identity
    #[serde(default)]
    sub_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CenterError {
    #[serde(default)]
    error: String,
}

fn identity_from_center(body: CenterIdentity) -> Result<Identity, AuthError> {
    let role = body.role.unwrap_or(Role::User);
    // 用户ID会进入房间ID与存储键 / user ids end up inside room ids and storage keys
    validate_user_id("user_id", &body.user_id).map_err(|e| AuthError::Invalid(e.public_message()))?;
    match body.sub_user_id {
        Some(sub) if !sub.is_empty() => {
            validate_user_id("sub_user_id", &sub).map_err(|e| AuthError::Invalid(e.public_message()))?;
            if role == Role::User {
                return Err(AuthError::Invalid("impersonation requires an agent or admin".to_string()));
            }
            Ok(Identity::Impersonated {
                sub_user_id: sub,
                supervisor_id: body.user_id,
            })
        }
        _ => Ok(Identity::Real {
            user_id: body.user_id,
            role,
        }),
    }
}

/// 通过 HTTP 调用鉴权中心 / Auth center over HTTP
pub struct CenterAuthenticator {
    client: reqwest::Client,
    center_url: String,
}

impl CenterAuthenticator {
    pub fn new(center_url: &str, timeout_ms: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            client,
            center_url: center_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Authenticator for CenterAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        let resp = self
            .client
            .get(format!("{}/v1/sso/auth", self.center_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            let body: CenterIdentity = resp
                .json()
                .await
                .map_err(|e| AuthError::Invalid(format!("unexpected auth center body: {}", e)))?;
            let identity = identity_from_center(body)?;
            debug!(user_id = identity.acting_user(), actor = identity.actor(), "🔐 token validated");
            return Ok(identity);
        }
        if status.is_server_error() {
            return Err(AuthError::Unavailable(format!("status {}", status)));
        }
        let reason = resp.json::<CenterError>().await.map(|b| b.error).unwrap_or_default();
        warn!(%status, reason = %reason, "🔐 token rejected by auth center");
        if reason.contains("expired") {
            Err(AuthError::Expired)
        } else {
            Err(AuthError::Invalid(if reason.is_empty() { status.to_string() } else { reason }))
        }
    }
}

/// 静态令牌表（本地联调与测试）/ Static token table for local runs and tests
#[derive(Default)]
pub struct StaticAuthenticator {
    tokens: DashMap<String, Result<Identity, AuthError>>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(self, token: &str, identity: Identity) -> Self {
        self.tokens.insert(token.to_string(), Ok(identity));
        self
    }

    pub fn with_expired(self, token: &str) -> Self {
        self.tokens.insert(token.to_string(), Err(AuthError::Expired));
        self
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        match self.tokens.get(token) {
            Some(entry) => entry.value().clone(),
            None => Err(AuthError::Invalid("unknown token".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_prefix_is_optional() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer   "), None);
    }

    #[test]
    fn center_body_maps_to_identity() {
        let real = identity_from_center(CenterIdentity {
            user_id: "u1".into(),
            role: None,
            sub_user_id: None,
        })
        .unwrap();
        assert_eq!(real.acting_user(), "u1");

        let imp = identity_from_center(CenterIdentity {
            user_id: "agent-1".into(),
            role: Some(Role::Agent),
            sub_user_id: Some("persona-9".into()),
        })
        .unwrap();
        assert_eq!(imp.acting_user(), "persona-9");
        assert_eq!(imp.supervisor(), Some("agent-1"));

        assert!(identity_from_center(CenterIdentity {
            user_id: "u1".into(),
            role: Some(Role::User),
            sub_user_id: Some("someone".into()),
        })
        .is_err());
    }

    #[test]
    fn center_ids_with_delimiters_are_rejected() {
        for bad in ["a/b", "a#b", ""] {
            assert!(matches!(
                identity_from_center(CenterIdentity {
                    user_id: bad.into(),
                    role: None,
                    sub_user_id: None,
                }),
                Err(AuthError::Invalid(_))
            ));
        }
        assert!(matches!(
            identity_from_center(CenterIdentity {
                user_id: "agent-1".into(),
                role: Some(Role::Agent),
                sub_user_id: Some("persona/../bob".into()),
            }),
            Err(AuthError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn static_table_distinguishes_expired_from_invalid() {
        let auth = StaticAuthenticator::new()
            .with_identity(
                "good",
                Identity::Real {
                    user_id: "u1".into(),
                    role: Role::User,
                },
            )
            .with_expired("old");
        assert!(auth.authenticate("good").await.is_ok());
        assert_eq!(auth.authenticate("old").await, Err(AuthError::Expired));
        assert!(matches!(auth.authenticate("nope").await, Err(AuthError::Invalid(_))));
        assert_eq!(auth.authenticate("").await, Err(AuthError::Missing));
    }

    #[tokio::test]
    async fn unreachable_center_is_unavailable() {
        let auth = CenterAuthenticator::new("http://127.0.0.1:9", 200).unwrap();
        assert!(matches!(auth.authenticate("t").await, Err(AuthError::Unavailable(_))));
    }
}
