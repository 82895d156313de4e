//! v-date-im：约会平台实时核心
//! Presence, real-time 1:1 messaging, call signaling and subscription quota
//! accounting for the vgo dating platform.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod quota;
pub mod router;
pub mod routing;
pub mod server;
pub mod service;
pub mod session;
pub mod storage;
pub mod tasks;
pub mod ws;

pub use error::{ImError, ImResult};
pub use server::VDateIMServer;
