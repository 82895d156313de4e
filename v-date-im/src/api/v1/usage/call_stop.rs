use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use v::response::respond_ok;

use crate::api::extract::AuthedUser;
use crate::domain::CallType;
use crate::error::ImError;
use crate::server::VDateIMServer;

#[derive(Debug, Deserialize)]
pub struct CallStopBody {
    pub call_type: CallType,
    pub elapsed_seconds: f64,
}

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::post().to(call_stop_handle)));
}

// 通话结束上报，每个通话分支只能上报一次
// Call stop report; exactly one per call leg
pub async fn call_stop_handle(
    server: web::Data<Arc<VDateIMServer>>,
    user: AuthedUser,
    body: web::Json<CallStopBody>,
) -> Result<HttpResponse, ImError> {
    let report = server
        .call_usage
        .stop_call(user.0.acting_user(), body.call_type, body.elapsed_seconds)
        .await?;
    Ok(respond_ok(report))
}
