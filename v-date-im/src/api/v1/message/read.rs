use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use v::response::respond_ok;

use crate::api::extract::AuthedUser;
use crate::error::ImError;
use crate::server::VDateIMServer;

#[derive(Debug, Deserialize)]
pub struct ReadBody {
    pub peer_user_id: String,
    pub message_ids: Vec<String>,
}

// 路由注册入口（POST）/ Route registration (POST)
pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::post().to(read_handle)));
}

// 标记已读 / Mark messages read
pub async fn read_handle(
    server: web::Data<Arc<VDateIMServer>>,
    user: AuthedUser,
    body: web::Json<ReadBody>,
) -> Result<HttpResponse, ImError> {
    let receipt = server
        .chat
        .mark_read(&user.0, &body.peer_user_id, &body.message_ids)
        .await?;
    Ok(respond_ok(receipt))
}
