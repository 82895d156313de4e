use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use v::response::respond_ok;

use crate::api::extract::AuthedUser;
use crate::error::ImError;
use crate::routing::room_id;
use crate::server::VDateIMServer;
use crate::service::chat::HistoryItem;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub peer: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub room_id: String,
    pub items: Vec<HistoryItem>,
}

// 路由注册入口（GET）/ Route registration (GET)
pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(history_handle)));
}

// 历史消息查询（已应用本人清空点）/ Query history with the caller's cleared-before mark applied
pub async fn history_handle(
    server: web::Data<Arc<VDateIMServer>>,
    user: AuthedUser,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, ImError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let items = server.chat.history(&user.0, &query.peer, limit).await?;
    Ok(respond_ok(HistoryResponse {
        room_id: room_id(user.0.acting_user(), &query.peer),
        items,
    }))
}
