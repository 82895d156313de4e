//! HTTP 接口 / HTTP surface

pub mod extract;
pub mod v1;
