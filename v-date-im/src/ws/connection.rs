use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::ServerEvent;
use crate::presence::{ConnectionHandle, Unregistered};
use crate::server::{Connection, VDateIMServer};
use crate::service::auth::bearer_token;
use crate::session::{Outcome, SessionState};
use crate::ws::handler::{authenticate, dispatch};

/// 处理新连接 / Handle a new connection
pub async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, server: VDateIMServer) -> Result<()> {
    debug!("📨 New connection from: {}", peer_addr);

    // 握手阶段读取 Authorization 头 / pick up the Authorization header during the handshake
    let mut header_token: Option<String> = None;
    let capture = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        header_token = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string);
        Ok(resp)
    };
    let ws_stream = accept_hdr_async(stream, capture).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let client_id = Uuid::new_v4().to_string();

    let writer_client = client_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(&msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                debug!("Failed to send message to {}: {}", writer_client, e);
                break;
            }
            if is_close {
                let _ = ws_sender.close().await;
                break;
            }
        }
    });

    let connection = Connection::new(&client_id, peer_addr, ConnectionHandle::new(client_id.clone(), tx));
    let kick = connection.kick.clone();
    server.connections.insert(client_id.clone(), connection);
    info!("✅ Client {} connected from {}", client_id, peer_addr);
    server.send_to_client(
        &client_id,
        &ServerEvent::Connected {
            client_id: client_id.clone(),
        },
    );

    let mut state = SessionState::new(client_id.clone());
    if let Some(token) = header_token {
        state = authenticate(&server, state, &token).await;
    } else {
        let deadline = Duration::from_millis(server.config.auth.deadline_ms);
        let watchdog_client = client_id.clone();
        let watchdog_server = server.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let unauthenticated = watchdog_server
                .connections
                .get(&watchdog_client)
                .map(|c| c.user_id.is_none())
                .unwrap_or(false);
            if unauthenticated {
                warn!("disconnecting unauthenticated client_id={}", watchdog_client);
                watchdog_server.send_to_client(
                    &watchdog_client,
                    &ServerEvent::error(crate::domain::ErrorKind::Authentication, "authentication timeout"),
                );
                watchdog_server.close_client(&watchdog_client, "authentication timeout");
            }
        });
    }

    // 每个连接内事件严格按到达顺序处理 / events of one connection are handled strictly in order
    while !state.is_closed() {
        tokio::select! {
            _ = kick.notified() => break,
            msg = ws_receiver.next() => match msg {
                Some(Ok(message)) => state = dispatch(&server, state, message).await,
                Some(Err(e)) => {
                    debug!("WebSocket error from {}: {}", client_id, e);
                    break;
                }
                None => break,
            },
        }
    }

    let state = state.apply(Outcome::Disconnected);
    server.router.leave_all(&client_id);
    if let Some((_, connection)) = server.connections.remove(&client_id) {
        if let Some(user_id) = &connection.user_id {
            if server.presence.unregister(user_id, &client_id) == Unregistered::LastConnection {
                let ended = server.calls.end_calls_for(user_id).await;
                if ended > 0 {
                    info!(user_id = %user_id, ended, "📴 calls ended by disconnect");
                }
            }
        }
    }
    // 句柄全部释放后写任务自行结束 / the writer ends once every handle is dropped
    if tokio::time::timeout(Duration::from_millis(500), &mut send_task).await.is_err() {
        send_task.abort();
        error!("writer for {} did not finish, aborted", client_id);
    }
    info!(phase = ?state.phase(), "👋 Client {} disconnected", client_id);
    Ok(())
}
