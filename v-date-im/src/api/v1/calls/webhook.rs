use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use tracing::warn;
use v::response::respond_ok;

use crate::error::ImError;
use crate::server::VDateIMServer;
use crate::service::webhook::{settle_call, verify_signature, CallWebhook, SIGNATURE_HEADER};

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::post().to(call_webhook_handle)));
}

// 外部通话基础设施回调：校验签名后为每个参与者结算
// Call infrastructure callback: verify the signature, then settle every participant
pub async fn call_webhook_handle(
    server: web::Data<Arc<VDateIMServer>>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ImError> {
    let signature = req.headers().get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if !verify_signature(server.config.calls.webhook_secret.as_deref(), &body, signature) {
        warn!(peer = ?req.peer_addr(), "🪝 call webhook signature rejected");
        return Err(ImError::Authentication("invalid webhook signature".to_string()));
    }
    let hook: CallWebhook = serde_json::from_slice(&body)
        .map_err(|e| ImError::Validation(format!("invalid webhook body: {}", e)))?;
    let settled = settle_call(&server.call_usage, &hook).await?;
    Ok(respond_ok(serde_json::json!({
        "call_id": hook.call_id,
        "participants": settled,
    })))
}
