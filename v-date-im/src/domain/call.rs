use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::subscription::ResourceKind;

/// 通话类型 / Call type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Audio,
    Video,
}

impl CallType {
    /// 对应的计量资源 / Resource the call consumes
    pub fn resource(&self) -> ResourceKind {
        match self {
            CallType::Audio => ResourceKind::AudioSeconds,
            CallType::Video => ResourceKind::VideoSeconds,
        }
    }
}

/// 通话状态 / Call status: initiated → ongoing → ended, or missed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiated,
    Ongoing,
    Ended,
    Missed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallParticipant {
    pub user_id: String,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
}

/// 通话会话 / Call session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallSession {
    pub id: String,
    pub room_id: String,
    pub call_type: CallType,
    pub status: CallStatus,
    pub caller_id: String,
    pub callee_id: String,
    pub participants: Vec<CallParticipant>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
}

impl CallSession {
    pub fn new(
        id: String,
        room_id: String,
        call_type: CallType,
        caller_id: &str,
        callee_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            room_id,
            call_type,
            status: CallStatus::Initiated,
            caller_id: caller_id.to_string(),
            callee_id: callee_id.to_string(),
            participants: vec![CallParticipant {
                user_id: caller_id.to_string(),
                joined_at: Some(now),
                left_at: None,
            }],
            created_at: now,
            started_at: None,
            ended_at: None,
            duration_seconds: 0,
        }
    }

    /// 被叫接听 / Callee accepts; only valid while initiated
    pub fn accept(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != CallStatus::Initiated {
            return false;
        }
        self.status = CallStatus::Ongoing;
        self.started_at = Some(now);
        self.participants.push(CallParticipant {
            user_id: self.callee_id.clone(),
            joined_at: Some(now),
            left_at: None,
        });
        true
    }

    /// 结束通话并返回计费时长（秒，向下取整）
    /// Close the call and return the billable whole seconds.
    ///
    /// 未接通的通话记为 missed，时长为 0。
    /// A call that never went ongoing is marked missed with zero duration.
    pub fn finish(&mut self, now: DateTime<Utc>) -> u64 {
        for p in self.participants.iter_mut().filter(|p| p.left_at.is_none()) {
            p.left_at = Some(now);
        }
        self.ended_at = Some(now);
        match (self.status, self.started_at) {
            (CallStatus::Ongoing, Some(started)) => {
                self.status = CallStatus::Ended;
                self.duration_seconds = (now - started).num_seconds().max(0) as u64;
            }
            _ => {
                self.status = CallStatus::Missed;
                self.duration_seconds = 0;
            }
        }
        self.duration_seconds
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }

    /// 另一方 / The other party
    pub fn peer_of(&self, user_id: &str) -> &str {
        if self.caller_id == user_id {
            &self.callee_id
        } else {
            &self.caller_id
        }
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.user_id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ongoing_call_bills_whole_seconds() {
        let t0 = Utc::now();
        let mut call = CallSession::new("c1".into(), "a#b".into(), CallType::Video, "a", "b", t0);
        assert!(call.accept(t0 + Duration::seconds(2)));
        assert!(!call.accept(t0 + Duration::seconds(3)));
        let billed = call.finish(t0 + Duration::milliseconds(2_000 + 61_900));
        assert_eq!(billed, 61);
        assert_eq!(call.status, CallStatus::Ended);
        assert_eq!(call.participant_ids(), vec!["a", "b"]);
        assert!(call.participants.iter().all(|p| p.left_at.is_some()));
    }

    #[test]
    fn unanswered_call_is_missed() {
        let t0 = Utc::now();
        let mut call = CallSession::new("c2".into(), "a#b".into(), CallType::Audio, "a", "b", t0);
        assert_eq!(call.finish(t0 + Duration::seconds(30)), 0);
        assert_eq!(call.status, CallStatus::Missed);
        assert_eq!(call.peer_of("a"), "b");
        assert_eq!(CallType::Audio.resource(), ResourceKind::AudioSeconds);
    }
}
