use actix_web::http::StatusCode;
use actix_web::{web, Responder};
use std::sync::Arc;
use v::response::respond_any;

use crate::server::VDateIMServer;

// 路由注册入口（GET）
// Route registration entry (GET)
pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(health_ready_handle)));
}

// 就绪检查：订阅存储可读即就绪
// Readiness: ready once the subscription store answers
pub async fn health_ready_handle(server: web::Data<Arc<VDateIMServer>>) -> impl Responder {
    let store = server.stores.subscriptions.find_by_user("__ready__").await;
    let is_ready = store.is_ok();
    let payload = serde_json::json!({
        "ready": is_ready,
        "service": "v-date-im",
        "timestamp": chrono::Utc::now().timestamp_millis(),
        "online_users": server.presence.online_count(),
        "connections": server.connections.len(),
    });
    let code = if is_ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    respond_any(code, payload)
}
