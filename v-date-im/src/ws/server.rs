use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use crate::server::VDateIMServer;

/// 启动WS监听 / Start WS listener
impl VDateIMServer {
    pub async fn run(&self, host: &str, port: u16) -> Result<()> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr).await?;
        info!("🚀 v-date-im WebSocket Server starting on {}", addr);
        self.serve(listener).await
    }

    /// 在已绑定的监听器上接受连接 / Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("📡 Waiting for connections...");
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = crate::ws::connection::handle_connection(stream, peer_addr, server).await {
                    tracing::error!("Connection error from {}: {}", peer_addr, e);
                }
            });
        }
    }
}
