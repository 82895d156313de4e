use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

use crate::domain::Identity;
use crate::error::ImError;
use crate::server::VDateIMServer;
use crate::service::auth::bearer_token;

/// 内部推送接口的令牌头 / Header carrying the internal push token
pub const INTERNAL_TOKEN_HEADER: &str = "X-Internal-Token";

/// 已通过 Bearer 鉴权的调用者 / Caller authenticated by a bearer credential
#[derive(Clone, Debug)]
pub struct AuthedUser(pub Identity);

impl FromRequest for AuthedUser {
    type Error = ImError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let server = req.app_data::<web::Data<Arc<VDateIMServer>>>().cloned();
        let token = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string);
        Box::pin(async move {
            let server = server.ok_or_else(|| ImError::Internal(anyhow::anyhow!("server state not configured")))?;
            let token = token.ok_or_else(|| ImError::Authentication("missing credential".to_string()))?;
            match server.authenticator.authenticate(&token).await {
                Ok(identity) => Ok(AuthedUser(identity)),
                Err(e) => {
                    warn!("🔐 http authentication failed: {}", e);
                    Err(e.into())
                }
            }
        })
    }
}

/// 逐字节异或比较，耗时与差异位置无关 / XOR-fold comparison; timing does not depend on where bytes differ
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// 校验内部令牌；未配置时接口关闭 / Check the internal token; endpoints are closed when none is configured
pub fn require_internal(server: &VDateIMServer, req: &HttpRequest) -> Result<(), ImError> {
    let Some(expected) = server.config.internal_token.as_deref() else {
        return Err(ImError::Authentication("internal endpoints are disabled".to_string()));
    };
    let given = req
        .headers()
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if constant_time_eq(given.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        warn!("internal push rejected: bad token");
        Err(ImError::Authentication("invalid internal token".to_string()))
    }
}
