//! 实时通道驱动：解析 → 归约 → 执行副作用
//! Real-time driver: parse, reduce, then execute the effects

use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::domain::{ClientEvent, ErrorKind, ProfileSnapshot, ServerEvent};
use crate::error::ImError;
use crate::protocol::{reduce, CallAction, Effect};
use crate::server::VDateIMServer;
use crate::service::calls::InviteOutcome;
use crate::service::chat::SendRequest;
use crate::session::{Outcome, SessionState};

/// 处理一个入站帧，返回新的会话状态 / Handle one inbound frame and return the next session state
pub async fn dispatch(server: &VDateIMServer, state: SessionState, message: Message) -> SessionState {
    // 任何入站帧都算活跃，含传输层 ping / any inbound frame counts as activity, transport pings included
    server.update_heartbeat(state.client_id());
    let text = match message {
        Message::Text(text) => text,
        Message::Close(_) => return state.apply(Outcome::Disconnected),
        // 传输层 ping/pong 由 tungstenite 处理 / transport pings are handled by tungstenite
        _ => return state,
    };
    let client_id = state.client_id().to_string();
    debug!(client_id = %client_id, "📨 received {} bytes", text.len());
    let event = match ClientEvent::parse(&text) {
        Ok(event) => event,
        Err(reason) => {
            server.send_to_client(&client_id, &ServerEvent::error(ErrorKind::Validation, reason));
            return state;
        }
    };
    let (mut state, effects) = reduce(state, event);
    for effect in effects {
        state = execute(server, state, effect).await;
    }
    state
}

fn reply_error(server: &VDateIMServer, client_id: &str, err: &ImError) {
    server.send_to_client(client_id, &ServerEvent::error(err.kind(), err.public_message()));
}

async fn execute(server: &VDateIMServer, state: SessionState, effect: Effect) -> SessionState {
    let client_id = state.client_id().to_string();
    match effect {
        Effect::Reply(event) => {
            server.send_to_client(&client_id, &event);
            state
        }
        Effect::Heartbeat => {
            server.update_heartbeat(&client_id);
            state
        }
        Effect::Close { reason } => {
            server.close_client(&client_id, &reason);
            state
        }
        Effect::Authenticate { token } => authenticate(server, state, &token).await,
        Effect::OnlineUsers => {
            let users = server.presence.snapshot();
            server.send_to_client(&client_id, &ServerEvent::OnlineUsers { users });
            state
        }
        effect => {
            let Some(identity) = state.identity().cloned() else {
                return state;
            };
            match effect {
                Effect::Join { peer_user_id } => {
                    match server.router.join(&identity, &client_id, &peer_user_id).await {
                        Ok(joined) => {
                            info!(
                                client_id = %client_id,
                                user_id = identity.acting_user(),
                                actor = identity.actor(),
                                subscription_id = state.subscription_id().unwrap_or("-"),
                                room_id = %joined.room_id,
                                "🚪 session joined room"
                            );
                            server.send_to_client(
                                &client_id,
                                &ServerEvent::Joined {
                                    room_id: joined.room_id.clone(),
                                    peer_user_id,
                                    peer_online: joined.peer_online,
                                },
                            );
                            return state.apply(Outcome::Joined {
                                room_id: joined.room_id,
                            });
                        }
                        Err(e) => reply_error(server, &client_id, &e),
                    }
                }
                Effect::Send {
                    peer_user_id,
                    body,
                    client_correlation_id,
                    reply_to,
                } => {
                    let req = SendRequest {
                        peer_user_id,
                        body,
                        client_correlation_id,
                        reply_to,
                    };
                    // 先持久化并确认，再投递 / persist and acknowledge, then deliver
                    match server.chat.persist(&identity, req).await {
                        Ok(persisted) => {
                            info!(
                                client_id = %client_id,
                                user_id = identity.acting_user(),
                                actor = identity.actor(),
                                subscription_id = state.subscription_id().unwrap_or("-"),
                                message_id = %persisted.message.id,
                                remaining = ?persisted.remaining_quota,
                                "📨 message acknowledged"
                            );
                            server.send_to_client(&client_id, &persisted.ack());
                            server.chat.deliver(&persisted).await;
                        }
                        Err(e) => reply_error(server, &client_id, &e),
                    }
                }
                Effect::Typing {
                    peer_user_id, started, ..
                } => {
                    if let Err(e) = server.chat.typing(&identity, &peer_user_id, started) {
                        reply_error(server, &client_id, &e);
                    }
                }
                Effect::MarkRead {
                    peer_user_id,
                    message_ids,
                } => {
                    if let Err(e) = server.chat.mark_read(&identity, &peer_user_id, &message_ids).await {
                        reply_error(server, &client_id, &e);
                    }
                }
                Effect::Call { action, signal } => {
                    let result = match action {
                        CallAction::Invite => match server.calls.invite(&identity, &signal).await {
                            Ok(InviteOutcome::PeerOffline) => Ok(Some(ServerEvent::CallFailed {
                                room_id: signal.room_id.clone(),
                                peer_user_id: signal.peer_user_id.clone(),
                                call_type: signal.call_type,
                                reason: "offline".to_string(),
                            })),
                            Ok(InviteOutcome::Ringing { .. }) => Ok(None),
                            Err(e) => Err(e),
                        },
                        CallAction::Accept => server.calls.accept(&identity, &signal).await.map(|_| None),
                        CallAction::Reject => server.calls.reject(&identity, &signal).await.map(|_| None),
                        CallAction::End => server
                            .calls
                            .end(&identity, &signal)
                            .await
                            .map(|notice| Some(ServerEvent::CallEnd(notice))),
                    };
                    match result {
                        Ok(Some(event)) => {
                            server.send_to_client(&client_id, &event);
                        }
                        Ok(None) => {}
                        Err(e) => reply_error(server, &client_id, &e),
                    }
                }
                _ => {}
            }
            state
        }
    }
}

/// 验证凭证并登记在线；失败立即关闭 / Validate the credential and register presence; failure closes at once
pub async fn authenticate(server: &VDateIMServer, state: SessionState, token: &str) -> SessionState {
    let client_id = state.client_id().to_string();
    let identity = match server.authenticator.authenticate(token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(client_id = %client_id, "🔐 authentication failed: {}", e);
            let err = ImError::from(e);
            reply_error(server, &client_id, &err);
            server.close_client(&client_id, "authentication failed");
            return state.apply(Outcome::AuthFailed);
        }
    };
    let user_id = identity.acting_user().to_string();

    let Some(handle) = server.connections.get(&client_id).map(|c| c.handle.clone()) else {
        return state.apply(Outcome::Disconnected);
    };
    let subscription_id = match server.stores.subscriptions.find_by_user(&user_id).await {
        Ok(sub) => sub.map(|s| s.id),
        Err(e) => {
            warn!(user_id = %user_id, "subscription lookup failed at auth: {}", e);
            None
        }
    };
    let profile = match server.stores.users.get_profile_snapshot(&user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => ProfileSnapshot {
            name: user_id.clone(),
            avatar: None,
        },
        Err(e) => {
            warn!(user_id = %user_id, "profile lookup failed: {}", e);
            ProfileSnapshot {
                name: user_id.clone(),
                avatar: None,
            }
        }
    };

    server.bind_user(&client_id, &user_id);
    let registered = server.presence.register(&user_id, handle, profile);
    server.send_to_client(
        &client_id,
        &ServerEvent::AuthResponse {
            user_id: user_id.clone(),
            supervisor_id: identity.supervisor().map(str::to_string),
        },
    );
    server.send_to_client(
        &client_id,
        &ServerEvent::OnlineUsers {
            users: registered.snapshot,
        },
    );
    match identity.supervisor() {
        Some(supervisor) => info!(
            client_id = %client_id,
            user_id = %user_id,
            supervisor,
            "🔑 authenticated as sub-identity"
        ),
        None => info!(client_id = %client_id, user_id = %user_id, "🔑 authenticated"),
    }
    state.apply(Outcome::Authenticated {
        identity,
        subscription_id,
    })
}
