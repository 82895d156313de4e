use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::{DenyReason, QuotaLedger, QuotaPolicy};
use crate::domain::{Allowance, CallType};
use crate::error::{ImError, ImResult};

/// startCall 的结果 / Result of `start_call`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallGate {
    /// remaining_seconds: None 表示不限 / `None` means unlimited
    Granted { remaining_seconds: Option<u64> },
    Denied(DenyReason),
}

impl CallGate {
    pub fn into_result(self, call_type: CallType) -> ImResult<Option<u64>> {
        match self {
            CallGate::Granted { remaining_seconds } => Ok(remaining_seconds),
            CallGate::Denied(reason) => Err(reason.into_error(call_type.resource())),
        }
    }
}

/// stopCall 的结果 / Result of `stop_call`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub debited_seconds: u64,
    /// 扣减后的用量 / usage after the debit, absent when nothing was recorded
    pub used_seconds: Option<u64>,
}

/// 把通话时长换算成计费秒数：负数归零，小数向下取整
/// Billable seconds: negatives clamp to zero, fractions truncate down
pub fn billable_seconds(elapsed_seconds: f64) -> u64 {
    if !elapsed_seconds.is_finite() || elapsed_seconds <= 0.0 {
        return 0;
    }
    elapsed_seconds.floor() as u64
}

/// 通话用量账本 / Call usage ledger
///
/// 开始时只做准入，不预扣；结束时按实际时长无条件记账（允许透支，下一次准入会被拒绝）。
/// Start only gates entry; stop records the actual duration unconditionally
/// (overdraw is allowed and the next start is denied).
pub struct CallUsageLedger {
    quota: Arc<QuotaLedger>,
}

impl CallUsageLedger {
    pub fn new(quota: Arc<QuotaLedger>) -> Self {
        Self { quota }
    }

    pub async fn start_call(&self, user_id: &str, call_type: CallType) -> anyhow::Result<CallGate> {
        if self.quota.policy() == QuotaPolicy::Permissive {
            return Ok(CallGate::Granted { remaining_seconds: None });
        }
        let kind = call_type.resource();
        let Some(sub) = self.quota.store().find_by_user(user_id).await? else {
            return Ok(CallGate::Denied(DenyReason::NoSubscription));
        };
        if !sub.is_active_at(Utc::now()) {
            return Ok(CallGate::Denied(DenyReason::Expired));
        }
        let gate = match sub.allowance(kind) {
            Allowance::Unlimited => CallGate::Granted { remaining_seconds: None },
            Allowance::Disabled => CallGate::Denied(DenyReason::FeatureDisabled),
            Allowance::Limited(allowed) => {
                let used = sub.used(kind);
                if used >= allowed {
                    CallGate::Denied(DenyReason::Exhausted { used, allowed })
                } else {
                    CallGate::Granted {
                        remaining_seconds: Some(allowed - used),
                    }
                }
            }
        };
        if let CallGate::Denied(reason) = gate {
            warn!(user_id, call_type = ?call_type, ?reason, "call start denied");
        }
        Ok(gate)
    }

    /// 每个通话分支只能上报一次；重复上报会重复计费
    /// Must be reported exactly once per call leg; duplicate reports over-debit
    pub async fn stop_call(&self, user_id: &str, call_type: CallType, elapsed_seconds: f64) -> ImResult<StopReport> {
        let seconds = billable_seconds(elapsed_seconds);
        if self.quota.policy() == QuotaPolicy::Permissive {
            return Ok(StopReport {
                debited_seconds: 0,
                used_seconds: None,
            });
        }
        let kind = call_type.resource();
        let Some(sub) = self.quota.store().find_by_user(user_id).await? else {
            return Err(ImError::Subscription("no subscription to record call usage against".to_string()));
        };
        if seconds == 0 {
            return Ok(StopReport {
                debited_seconds: 0,
                used_seconds: Some(sub.used(kind)),
            });
        }
        let delta = i64::try_from(seconds).unwrap_or(i64::MAX);
        let used = self.quota.store().add_usage(&sub.id, kind, delta).await?;
        info!(user_id, subscription_id = %sub.id, resource = %kind, seconds, ?used, "📞 call usage recorded");
        Ok(StopReport {
            debited_seconds: seconds,
            used_seconds: used,
        })
    }

    /// 同一时长分别记到每个参与者自己的订阅上
    /// Debit the same duration independently against every participant
    pub async fn settle(
        &self,
        participants: &[String],
        call_type: CallType,
        elapsed_seconds: f64,
    ) -> Vec<(String, ImResult<StopReport>)> {
        let mut results = Vec::with_capacity(participants.len());
        for user_id in participants {
            let result = self.stop_call(user_id, call_type, elapsed_seconds).await;
            if let Err(e) = &result {
                warn!(user_id = %user_id, "call settlement failed: {}", e);
            }
            results.push((user_id.clone(), result));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Allowances, Usage};
    use crate::quota::test_support::subscription;
    use crate::storage::{MemoryStore, SubscriptionStore};

    async fn ledger(audio_allowed: Option<u64>, audio_used: u64) -> (CallUsageLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .replace_for_user(subscription(
                "s1",
                "alice",
                Allowances {
                    messages: None,
                    audio_seconds: audio_allowed,
                    video_seconds: Some(0),
                },
                Usage {
                    audio_seconds: audio_used,
                    ..Usage::default()
                },
            ))
            .await
            .unwrap();
        let quota = Arc::new(QuotaLedger::new(store.clone(), QuotaPolicy::Enforcing));
        (CallUsageLedger::new(quota), store)
    }

    #[test]
    fn durations_clamp_and_truncate() {
        assert_eq!(billable_seconds(-4.0), 0);
        assert_eq!(billable_seconds(12.99), 12);
        assert_eq!(billable_seconds(f64::NAN), 0);
    }

    #[tokio::test]
    async fn stop_may_overdraw_and_next_start_is_denied() {
        let (calls, store) = ledger(Some(60), 50).await;
        assert_eq!(
            calls.start_call("alice", CallType::Audio).await.unwrap(),
            CallGate::Granted {
                remaining_seconds: Some(10)
            }
        );
        let report = calls.stop_call("alice", CallType::Audio, 20.0).await.unwrap();
        assert_eq!(report.debited_seconds, 20);
        assert_eq!(report.used_seconds, Some(70));
        assert_eq!(store.find_by_id("s1").await.unwrap().unwrap().usage.audio_seconds, 70);
        assert_eq!(
            calls.start_call("alice", CallType::Audio).await.unwrap(),
            CallGate::Denied(DenyReason::Exhausted { used: 70, allowed: 60 })
        );
    }

    #[tokio::test]
    async fn start_gates_on_subscription_and_feature() {
        let (calls, _) = ledger(None, 0).await;
        assert_eq!(
            calls.start_call("alice", CallType::Audio).await.unwrap(),
            CallGate::Granted { remaining_seconds: None }
        );
        assert_eq!(
            calls.start_call("alice", CallType::Video).await.unwrap(),
            CallGate::Denied(DenyReason::FeatureDisabled)
        );
        assert_eq!(
            calls.start_call("bob", CallType::Audio).await.unwrap(),
            CallGate::Denied(DenyReason::NoSubscription)
        );
        assert!(matches!(
            CallGate::Denied(DenyReason::NoSubscription).into_result(CallType::Audio),
            Err(ImError::Subscription(_))
        ));
    }

    #[tokio::test]
    async fn settle_debits_each_participant_independently() {
        let (calls, store) = ledger(Some(600), 0).await;
        store
            .replace_for_user(subscription(
                "s2",
                "bob",
                Allowances {
                    audio_seconds: Some(600),
                    ..Allowances::default()
                },
                Usage::default(),
            ))
            .await
            .unwrap();
        let results = calls
            .settle(&["alice".to_string(), "bob".to_string(), "carol".to_string()], CallType::Audio, 42.7)
            .await;
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_ok());
        assert!(results[2].1.is_err());
        assert_eq!(store.find_by_id("s1").await.unwrap().unwrap().usage.audio_seconds, 42);
        assert_eq!(store.find_by_id("s2").await.unwrap().unwrap().usage.audio_seconds, 42);
    }
}
