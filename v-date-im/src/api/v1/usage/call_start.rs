use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use v::response::respond_ok;

use crate::api::extract::AuthedUser;
use crate::domain::CallType;
use crate::error::ImError;
use crate::server::VDateIMServer;

#[derive(Debug, Deserialize)]
pub struct CallStartBody {
    pub call_type: CallType,
}

// 路由注册入口（POST）/ Route registration (POST)
pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::post().to(call_start_handle)));
}

// 通话准入：只检查不预扣 / Call admission: gate only, nothing is reserved
pub async fn call_start_handle(
    server: web::Data<Arc<VDateIMServer>>,
    user: AuthedUser,
    body: web::Json<CallStartBody>,
) -> Result<HttpResponse, ImError> {
    let user_id = user.0.acting_user();
    let remaining = server
        .call_usage
        .start_call(user_id, body.call_type)
        .await?
        .into_result(body.call_type)?;
    info!(user_id, actor = user.0.actor(), call_type = ?body.call_type, ?remaining, "📞 call start granted");
    Ok(respond_ok(serde_json::json!({
        "granted": true,
        "call_type": body.call_type,
        "remaining_seconds": remaining,
    })))
}
