use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use v::response::respond_ok;

use crate::api::extract::AuthedUser;
use crate::error::ImError;
use crate::server::VDateIMServer;
use crate::service::chat::SendRequest;

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub peer_user_id: String,
    pub body: String,
    pub client_correlation_id: String,
    #[serde(default)]
    pub reply_to: Option<String>,
}

// 路由注册入口（POST）/ Route registration (POST)
pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::post().to(send_handle)));
}

// 无长连接时发送消息，流程与实时通道一致
// Send without a live connection; same pipeline as the real-time channel
pub async fn send_handle(
    server: web::Data<Arc<VDateIMServer>>,
    user: AuthedUser,
    body: web::Json<SendBody>,
) -> Result<HttpResponse, ImError> {
    let body = body.into_inner();
    let receipt = server
        .chat
        .send(
            &user.0,
            SendRequest {
                peer_user_id: body.peer_user_id,
                body: body.body,
                client_correlation_id: body.client_correlation_id,
                reply_to: body.reply_to,
            },
        )
        .await?;
    Ok(respond_ok(receipt))
}
