//! 服务层：鉴权、会话、通话信令、通话 webhook、健康检查
//! Service layer: auth, chat, call signaling, call webhook and health

pub mod auth;
pub mod calls;
pub mod chat;
pub mod health;
pub mod webhook;
