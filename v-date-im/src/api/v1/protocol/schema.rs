use actix_web::{web, Responder};
use v::response::respond_ok;

use crate::domain::protocol_schema;

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(schema_handle)));
}

// 实时事件协议的 JSON Schema / JSON schema of the real-time event protocol
pub async fn schema_handle() -> impl Responder {
    respond_ok(protocol_schema())
}
