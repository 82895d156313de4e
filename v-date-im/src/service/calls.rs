use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{CallNotice, CallSession, CallSignal, CallStatus, Identity, ServerEvent};
use crate::error::{ImError, ImResult};
use crate::presence::PresenceDirectory;
use crate::quota::CallUsageLedger;
use crate::routing::room_for;

/// 邀请结果 / Invite outcome
#[derive(Clone, Debug, PartialEq)]
pub enum InviteOutcome {
    /// 已送达被叫 / Delivered to the callee
    Ringing { call_id: String, remaining_seconds: Option<u64> },
    /// 被叫离线，立即失败不排队 / Callee offline, fails immediately
    PeerOffline,
}

/// 通话信令协调器：每个房间至多一个进行中的通话
/// Call signaling coordinator, at most one live call per room
pub struct CallCoordinator {
    sessions: DashMap<String, CallSession>,
    usage: Arc<CallUsageLedger>,
    presence: Arc<PresenceDirectory>,
    settle_on_signal_end: bool,
}

impl CallCoordinator {
    pub fn new(usage: Arc<CallUsageLedger>, presence: Arc<PresenceDirectory>, settle_on_signal_end: bool) -> Self {
        Self {
            sessions: DashMap::new(),
            usage,
            presence,
            settle_on_signal_end,
        }
    }

    fn notice(session: &CallSession, peer_user_id: &str, duration: Option<u64>) -> CallNotice {
        CallNotice {
            call_id: session.id.clone(),
            room_id: session.room_id.clone(),
            peer_user_id: peer_user_id.to_string(),
            call_type: session.call_type,
            duration_seconds: duration,
        }
    }

    fn check_room(user: &str, signal: &CallSignal) -> ImResult<String> {
        let room = room_for(user, &signal.peer_user_id)?;
        if room != signal.room_id {
            return Err(ImError::Validation("room_id does not match the peer".to_string()));
        }
        Ok(room)
    }

    pub async fn invite(&self, identity: &Identity, signal: &CallSignal) -> ImResult<InviteOutcome> {
        let caller = identity.acting_user();
        let room = Self::check_room(caller, signal)?;
        if !self.presence.is_online(&signal.peer_user_id) {
            info!(caller, callee = %signal.peer_user_id, "📵 call invite to offline peer");
            return Ok(InviteOutcome::PeerOffline);
        }
        let remaining = self
            .usage
            .start_call(caller, signal.call_type)
            .await?
            .into_result(signal.call_type)?;

        let session = match self.sessions.entry(room.clone()) {
            Entry::Occupied(_) => {
                return Err(ImError::Validation("a call is already in progress in this conversation".to_string()))
            }
            Entry::Vacant(slot) => {
                let session = CallSession::new(
                    Uuid::new_v4().to_string(),
                    room.clone(),
                    signal.call_type,
                    caller,
                    &signal.peer_user_id,
                    Utc::now(),
                );
                slot.insert(session.clone());
                session
            }
        };
        self.presence.deliver(
            &signal.peer_user_id,
            &ServerEvent::CallInvite(Self::notice(&session, caller, None)),
        );
        info!(caller, actor = identity.actor(), callee = %signal.peer_user_id, call_id = %session.id, call_type = ?signal.call_type, "📞 call invite");
        Ok(InviteOutcome::Ringing {
            call_id: session.id,
            remaining_seconds: remaining,
        })
    }

    pub async fn accept(&self, identity: &Identity, signal: &CallSignal) -> ImResult<CallNotice> {
        let callee = identity.acting_user();
        let room = Self::check_room(callee, signal)?;
        let call_type = {
            let session = self
                .sessions
                .get(&room)
                .ok_or_else(|| ImError::Validation("no call to accept".to_string()))?;
            if session.callee_id != callee || session.status != CallStatus::Initiated {
                return Err(ImError::Validation("this call cannot be accepted".to_string()));
            }
            session.call_type
        };
        // 被叫同样需要额度 / the callee is gated too
        self.usage.start_call(callee, call_type).await?.into_result(call_type)?;

        let session = {
            let mut session = self
                .sessions
                .get_mut(&room)
                .ok_or_else(|| ImError::Validation("call ended before it was accepted".to_string()))?;
            if !session.accept(Utc::now()) {
                return Err(ImError::Validation("this call cannot be accepted".to_string()));
            }
            session.clone()
        };
        self.presence.deliver(
            &session.caller_id,
            &ServerEvent::CallAccept(Self::notice(&session, callee, None)),
        );
        info!(callee, call_id = %session.id, "✅ call accepted");
        Ok(Self::notice(&session, &session.caller_id, None))
    }

    pub async fn reject(&self, identity: &Identity, signal: &CallSignal) -> ImResult<CallNotice> {
        let callee = identity.acting_user();
        let room = Self::check_room(callee, signal)?;
        let removed = self
            .sessions
            .remove_if(&room, |_, s| s.callee_id == callee && s.status == CallStatus::Initiated);
        let Some((_, mut session)) = removed else {
            return Err(ImError::Validation("no call to reject".to_string()));
        };
        session.finish(Utc::now());
        self.presence.deliver(
            &session.caller_id,
            &ServerEvent::CallReject(Self::notice(&session, callee, None)),
        );
        info!(callee, call_id = %session.id, "🚫 call rejected");
        Ok(Self::notice(&session, &session.caller_id, None))
    }

    /// 结束通话；已接通则按时长为每个参与者结算一次
    /// End a call; an answered one is settled once per participant
    pub async fn end(&self, identity: &Identity, signal: &CallSignal) -> ImResult<CallNotice> {
        let user = identity.acting_user();
        let room = Self::check_room(user, signal)?;
        let Some((_, session)) = self.sessions.remove_if(&room, |_, s| s.involves(user)) else {
            return Err(ImError::Validation("no call to end".to_string()));
        };
        let session = self.close(session, user).await;
        Ok(Self::notice(&session, session.peer_of(user), Some(session.duration_seconds)))
    }

    async fn close(&self, mut session: CallSession, ended_by: &str) -> CallSession {
        let duration = session.finish(Utc::now());
        let peer = session.peer_of(ended_by).to_string();
        self.presence.deliver(
            &peer,
            &ServerEvent::CallEnd(Self::notice(&session, ended_by, Some(duration))),
        );
        info!(ended_by, call_id = %session.id, status = ?session.status, duration, "📴 call ended");
        if session.status == CallStatus::Ended && self.settle_on_signal_end {
            self.settle(&session).await;
        }
        session
    }

    async fn settle(&self, session: &CallSession) {
        let results = self
            .usage
            .settle(&session.participant_ids(), session.call_type, session.duration_seconds as f64)
            .await;
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        if failed > 0 {
            warn!(call_id = %session.id, failed, "call settled with failures");
        }
    }

    /// 用户最后一个连接断开：结束其所有通话 / Last connection gone: end every call the user is in
    pub async fn end_calls_for(&self, user_id: &str) -> usize {
        let rooms: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.involves(user_id))
            .map(|s| s.key().clone())
            .collect();
        let mut ended = 0;
        for room in rooms {
            if let Some((_, session)) = self.sessions.remove_if(&room, |_, s| s.involves(user_id)) {
                self.close(session, user_id).await;
                ended += 1;
            }
        }
        ended
    }

    pub fn active_calls(&self) -> usize {
        self.sessions.len()
    }
}
