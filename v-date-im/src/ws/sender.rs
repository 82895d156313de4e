use tracing::{debug, warn};

use crate::domain::ServerEvent;
use crate::server::VDateIMServer;

impl VDateIMServer {
    /// 向指定客户端发送事件 / Send an event to one client
    pub fn send_to_client(&self, client_id: &str, event: &ServerEvent) -> bool {
        match self.connections.get(client_id) {
            Some(connection) => {
                let sent = connection.handle.send(event);
                debug!(client_id, event = event.name(), sent, "📤 reply");
                sent
            }
            None => {
                warn!(client_id, "⚠️  client not found for delivery");
                false
            }
        }
    }

    /// 发送关闭帧并让读循环退出 / Send a close frame and stop the reader loop
    pub fn close_client(&self, client_id: &str, reason: &str) -> bool {
        match self.connections.get(client_id) {
            Some(connection) => {
                connection.handle.close(reason);
                connection.kick.notify_one();
                debug!(client_id, reason, "🔒 close requested");
                true
            }
            None => false,
        }
    }
}
