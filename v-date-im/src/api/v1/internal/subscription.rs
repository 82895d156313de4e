use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use tracing::info;
use v::response::respond_ok;

use crate::api::extract::require_internal;
use crate::domain::Subscription;
use crate::error::ImError;
use crate::routing::validate_user_id;
use crate::server::VDateIMServer;

// 路由注册入口（PUT）/ Route registration (PUT)
pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::put().to(put_subscription_handle)));
}

// 计费子系统推送：新订阅整体替换旧订阅
// Pushed by billing: the new subscription replaces the previous one
pub async fn put_subscription_handle(
    server: web::Data<Arc<VDateIMServer>>,
    req: HttpRequest,
    body: web::Json<Subscription>,
) -> Result<HttpResponse, ImError> {
    require_internal(&server, &req)?;
    let sub = body.into_inner();
    validate_user_id("user_id", &sub.user_id)?;
    if sub.id.trim().is_empty() {
        return Err(ImError::Validation("id is required".to_string()));
    }
    if sub.end_at <= sub.start_at {
        return Err(ImError::Validation("end_at must be after start_at".to_string()));
    }
    let (id, user_id) = (sub.id.clone(), sub.user_id.clone());
    server.stores.subscriptions.replace_for_user(sub).await?;
    info!(subscription_id = %id, user_id = %user_id, "🧾 subscription replaced");
    Ok(respond_ok(serde_json::json!({ "subscription_id": id, "user_id": user_id })))
}
