use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use v::response::respond_ok;

use crate::api::extract::require_internal;
use crate::domain::ProfileSnapshot;
use crate::error::ImError;
use crate::routing::validate_user_id;
use crate::server::VDateIMServer;

#[derive(Debug, Deserialize)]
pub struct ProfileBody {
    pub user_id: String,
    #[serde(flatten)]
    pub profile: ProfileSnapshot,
}

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::put().to(put_profile_handle)));
}

// 用户子系统推送资料快照 / Profile snapshot pushed by the user subsystem
pub async fn put_profile_handle(
    server: web::Data<Arc<VDateIMServer>>,
    req: HttpRequest,
    body: web::Json<ProfileBody>,
) -> Result<HttpResponse, ImError> {
    require_internal(&server, &req)?;
    let body = body.into_inner();
    validate_user_id("user_id", &body.user_id)?;
    server.stores.users.put_profile(&body.user_id, body.profile).await?;
    debug!(user_id = %body.user_id, "profile snapshot stored");
    Ok(respond_ok(serde_json::json!({ "user_id": body.user_id })))
}
