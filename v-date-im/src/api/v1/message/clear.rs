use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use v::response::respond_ok;

use crate::api::extract::AuthedUser;
use crate::error::ImError;
use crate::routing::room_id;
use crate::server::VDateIMServer;

#[derive(Debug, Deserialize)]
pub struct ClearBody {
    pub peer_user_id: String,
}

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::post().to(clear_handle)));
}

// 清空（仅对本人）/ Clear history for the caller only
pub async fn clear_handle(
    server: web::Data<Arc<VDateIMServer>>,
    user: AuthedUser,
    body: web::Json<ClearBody>,
) -> Result<HttpResponse, ImError> {
    let at = server.chat.clear(&user.0, &body.peer_user_id).await?;
    Ok(respond_ok(serde_json::json!({
        "room_id": room_id(user.0.acting_user(), &body.peer_user_id),
        "cleared_before": at.timestamp_millis(),
    })))
}
