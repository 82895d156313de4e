use actix_web::web;

/// 路由配置包装 / Route configuration wrapper
pub fn configure(cfg: &mut web::ServiceConfig) {
    // 健康检查 / Health checks
    crate::api::v1::health::basic::register(cfg, "/v1/health");
    crate::api::v1::health::live::register(cfg, "/v1/health/live");
    crate::api::v1::health::ready::register(cfg, "/v1/health/ready");

    // 消息 / Messages
    crate::api::v1::message::send::register(cfg, "/v1/message/send");
    crate::api::v1::message::history::register(cfg, "/v1/message/history");
    crate::api::v1::message::read::register(cfg, "/v1/message/read");
    crate::api::v1::message::clear::register(cfg, "/v1/message/clear");

    crate::api::v1::presence::online::register(cfg, "/v1/presence/online");

    // 用量 / Usage
    crate::api::v1::usage::call_start::register(cfg, "/v1/usage/call/start");
    crate::api::v1::usage::call_stop::register(cfg, "/v1/usage/call/stop");
    crate::api::v1::usage::quota::register(cfg, "/v1/usage/quota");

    crate::api::v1::calls::webhook::register(cfg, "/v1/calls/webhook");
    crate::api::v1::protocol::schema::register(cfg, "/v1/protocol/schema");

    // 内部推送 / Internal pushes
    crate::api::v1::internal::subscription::register(cfg, "/v1/internal/subscription");
    crate::api::v1::internal::profile::register(cfg, "/v1/internal/profile");
}
