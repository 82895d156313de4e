//! 配额账本 / Quota ledger
//!
//! 检查与扣减在同一次存储原子操作中完成，没有独立的“提交”步骤。
//! Check and debit happen in one atomic storage operation; there is no
//! separate commit step for a racing caller to slip between.

pub mod calls;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{Allowance, DebitOutcome, PlanType, ResourceKind, Subscription};
use crate::error::{ImError, ImResult};
use crate::storage::SubscriptionStore;

pub use calls::{CallGate, CallUsageLedger, StopReport};

/// 配额策略，启动时决定一次 / Quota policy, decided once at startup
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaPolicy {
    Enforcing,
    /// 全部放行且不计量 / Grants everything without debiting
    Permissive,
}

impl FromStr for QuotaPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enforcing" => Ok(QuotaPolicy::Enforcing),
            "permissive" => Ok(QuotaPolicy::Permissive),
            other => Err(format!("unknown quota policy '{}'", other)),
        }
    }
}

/// 拒绝原因 / Why a quota check was denied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    NoSubscription,
    Expired,
    /// 额度为 0：套餐不含该功能 / allowance 0, the plan does not include it
    FeatureDisabled,
    Exhausted { used: u64, allowed: u64 },
}

impl DenyReason {
    pub fn into_error(self, kind: ResourceKind) -> ImError {
        match self {
            DenyReason::NoSubscription => ImError::Subscription("no active subscription".to_string()),
            DenyReason::Expired => ImError::Subscription("subscription expired".to_string()),
            DenyReason::FeatureDisabled => {
                ImError::QuotaExceeded(format!("{} is not included in your plan", kind))
            }
            DenyReason::Exhausted { used, allowed } => ImError::QuotaExceeded(format!(
                "{} allowance used up ({}/{})",
                kind, used, allowed
            )),
        }
    }
}

/// checkAndReserve 的结果 / Result of `check_and_reserve`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaDecision {
    /// remaining: None 表示不限 / `None` means unlimited
    Granted { remaining: Option<u64> },
    Denied(DenyReason),
}

/// 一次成功的预留，失败补偿时用于退还
/// A successful reservation, kept so a failed follow-up can refund it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub subscription_id: Option<String>,
    pub kind: ResourceKind,
    pub amount: u64,
    pub remaining: Option<u64>,
    /// 宽松策略下不扣减 / false under the permissive policy
    pub debited: bool,
}

/// 单项资源额度 / Quota of one resource
#[derive(Clone, Debug, Serialize)]
pub struct ResourceQuota {
    pub resource: ResourceKind,
    pub allowed: Option<u64>,
    pub used: u64,
    pub remaining: Option<u64>,
}

/// 额度概览 / Quota summary for a user
#[derive(Clone, Debug, Serialize)]
pub struct QuotaSummary {
    pub subscription_id: String,
    pub plan_type: PlanType,
    pub active: bool,
    pub end_at: DateTime<Utc>,
    pub resources: Vec<ResourceQuota>,
}

pub struct QuotaLedger {
    store: Arc<dyn SubscriptionStore>,
    policy: QuotaPolicy,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn SubscriptionStore>, policy: QuotaPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> QuotaPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    /// 检查并原子扣减 / Check and atomically debit
    pub async fn check_and_reserve(
        &self,
        subscription_id: &str,
        kind: ResourceKind,
        amount: u64,
    ) -> anyhow::Result<QuotaDecision> {
        if self.policy == QuotaPolicy::Permissive {
            return Ok(QuotaDecision::Granted { remaining: None });
        }
        let Some(sub) = self.store.find_by_id(subscription_id).await? else {
            return Ok(QuotaDecision::Denied(DenyReason::NoSubscription));
        };
        if !sub.is_active_at(Utc::now()) {
            return Ok(QuotaDecision::Denied(DenyReason::Expired));
        }
        let decision = match self.store.atomic_debit(subscription_id, kind, amount).await? {
            DebitOutcome::Applied { used, allowed } => QuotaDecision::Granted {
                remaining: allowed.map(|a| a.saturating_sub(used)),
            },
            DebitOutcome::Exceeded { allowed: 0, .. } => QuotaDecision::Denied(DenyReason::FeatureDisabled),
            DebitOutcome::Exceeded { used, allowed } => {
                QuotaDecision::Denied(DenyReason::Exhausted { used, allowed })
            }
            // 检查后被替换 / replaced between lookup and debit
            DebitOutcome::Missing => QuotaDecision::Denied(DenyReason::NoSubscription),
        };
        debug!(subscription_id, resource = %kind, amount, ?decision, "quota check");
        Ok(decision)
    }

    /// 按用户预留，拒绝时转换为错误 / Reserve for a user, turning denials into errors
    pub async fn reserve_for_user(&self, user_id: &str, kind: ResourceKind, amount: u64) -> ImResult<Reservation> {
        if self.policy == QuotaPolicy::Permissive {
            return Ok(Reservation {
                subscription_id: None,
                kind,
                amount,
                remaining: None,
                debited: false,
            });
        }
        let Some(sub) = self.store.find_by_user(user_id).await? else {
            warn!(user_id, resource = %kind, "quota denied: no subscription");
            return Err(DenyReason::NoSubscription.into_error(kind));
        };
        match self.check_and_reserve(&sub.id, kind, amount).await? {
            QuotaDecision::Granted { remaining } => Ok(Reservation {
                subscription_id: Some(sub.id),
                kind,
                amount,
                remaining,
                debited: true,
            }),
            QuotaDecision::Denied(reason) => {
                warn!(user_id, subscription_id = %sub.id, resource = %kind, ?reason, "quota denied");
                Err(reason.into_error(kind))
            }
        }
    }

    /// 补偿退还，尽力而为，不影响调用方 / Compensating refund; best effort, never fails the caller
    pub async fn refund(&self, subscription_id: &str, kind: ResourceKind, amount: u64) {
        if self.policy == QuotaPolicy::Permissive || amount == 0 {
            return;
        }
        let delta = -(i64::try_from(amount).unwrap_or(i64::MAX));
        match self.store.add_usage(subscription_id, kind, delta).await {
            Ok(Some(used)) => warn!(subscription_id, resource = %kind, amount, used, "quota refunded"),
            Ok(None) => warn!(subscription_id, resource = %kind, amount, "refund skipped: subscription gone"),
            Err(e) => warn!(subscription_id, resource = %kind, amount, "refund failed: {}", e),
        }
    }

    pub async fn release(&self, reservation: &Reservation) {
        if let (true, Some(id)) = (reservation.debited, &reservation.subscription_id) {
            self.refund(id, reservation.kind, reservation.amount).await;
        }
    }

    /// 要求有效订阅（宽松策略跳过）/ Require an active subscription (skipped when permissive)
    pub async fn ensure_active(&self, user_id: &str) -> ImResult<Option<Subscription>> {
        if self.policy == QuotaPolicy::Permissive {
            return Ok(None);
        }
        match self.store.find_by_user(user_id).await? {
            None => Err(DenyReason::NoSubscription.into_error(ResourceKind::Message)),
            Some(sub) if !sub.is_active_at(Utc::now()) => {
                Err(DenyReason::Expired.into_error(ResourceKind::Message))
            }
            Some(sub) => Ok(Some(sub)),
        }
    }

    /// 对方须持有有效订阅；只有订阅类拒绝改写为对方原因，存储故障原样上抛
    /// The peer must hold an active subscription; only subscription denials are
    /// reworded for the peer, storage failures propagate unchanged
    pub async fn ensure_peer_active(&self, peer_user_id: &str) -> ImResult<()> {
        match self.ensure_active(peer_user_id).await {
            Ok(_) => Ok(()),
            Err(ImError::Subscription(_) | ImError::QuotaExceeded(_)) => Err(ImError::Subscription(format!(
                "{} has no active subscription",
                peer_user_id
            ))),
            Err(other) => Err(other),
        }
    }

    /// 要求有效订阅且开通了消息功能 / Active subscription with messaging enabled
    pub async fn ensure_messaging_enabled(&self, user_id: &str) -> ImResult<()> {
        if let Some(sub) = self.ensure_active(user_id).await? {
            if sub.allowance(ResourceKind::Message) == Allowance::Disabled {
                return Err(DenyReason::FeatureDisabled.into_error(ResourceKind::Message));
            }
        }
        Ok(())
    }

    pub async fn summary(&self, user_id: &str) -> ImResult<QuotaSummary> {
        let Some(sub) = self.store.find_by_user(user_id).await? else {
            return Err(DenyReason::NoSubscription.into_error(ResourceKind::Message));
        };
        let resources = ResourceKind::ALL
            .iter()
            .map(|kind| ResourceQuota {
                resource: *kind,
                allowed: match sub.allowance(*kind) {
                    Allowance::Unlimited => None,
                    Allowance::Disabled => Some(0),
                    Allowance::Limited(n) => Some(n),
                },
                used: sub.used(*kind),
                remaining: sub.remaining(*kind),
            })
            .collect();
        Ok(QuotaSummary {
            active: sub.is_active_at(Utc::now()),
            subscription_id: sub.id,
            plan_type: sub.plan_type,
            end_at: sub.end_at,
            resources,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::{Allowances, PlanType, Subscription, Usage};
    use chrono::{Duration, Utc};

    pub fn subscription(id: &str, user: &str, allowances: Allowances, usage: Usage) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: id.to_string(),
            user_id: user.to_string(),
            plan_id: format!("plan-{}", id),
            plan_type: PlanType::Premium,
            start_at: now - Duration::days(1),
            end_at: now + Duration::days(30),
            allowances,
            usage,
        }
    }
}
