//! WebSocket 实时通道 / WebSocket real-time channel

pub mod connection;
pub mod handler;
pub mod sender;
pub mod server;
