use actix_web::{web, HttpResponse};
use std::sync::Arc;
use v::response::respond_ok;

use crate::api::extract::AuthedUser;
use crate::error::ImError;
use crate::server::VDateIMServer;

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(quota_handle)));
}

// 各资源剩余额度 / Remaining allowance per resource
pub async fn quota_handle(server: web::Data<Arc<VDateIMServer>>, user: AuthedUser) -> Result<HttpResponse, ImError> {
    let summary = server.quota.summary(user.0.acting_user()).await?;
    Ok(respond_ok(summary))
}
