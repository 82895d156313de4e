use actix_web::{web, HttpResponse};
use std::sync::Arc;
use v::response::respond_ok;

use crate::api::extract::AuthedUser;
use crate::error::ImError;
use crate::server::VDateIMServer;

// 路由注册入口（GET）/ Route registration (GET)
pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(online_handle)));
}

// 在线用户快照 / Presence snapshot
pub async fn online_handle(server: web::Data<Arc<VDateIMServer>>, _user: AuthedUser) -> Result<HttpResponse, ImError> {
    let users = server.presence.snapshot();
    Ok(respond_ok(serde_json::json!({
        "total": users.len(),
        "users": users,
    })))
}
