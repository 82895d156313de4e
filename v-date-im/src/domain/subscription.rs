use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 套餐类型 / Plan type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Free,
    Basic,
    Standard,
    Premium,
}

/// 可消耗资源 / Consumable resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// 单位：条 / unit: one message
    Message,
    /// 单位：秒 / unit: seconds
    AudioSeconds,
    VideoSeconds,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Message,
        ResourceKind::AudioSeconds,
        ResourceKind::VideoSeconds,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Message => "message",
            ResourceKind::AudioSeconds => "audio_seconds",
            ResourceKind::VideoSeconds => "video_seconds",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 套餐额度：None = 不限，0 = 未开通
/// Plan allowances: `None` is unlimited, `Some(0)` means the feature is disabled
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Allowances {
    pub messages: Option<u64>,
    pub audio_seconds: Option<u64>,
    pub video_seconds: Option<u64>,
}

/// 本周期累计用量 / Usage accumulated in the current period
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Usage {
    pub messages: u64,
    pub audio_seconds: u64,
    pub video_seconds: u64,
}

/// 单项额度的解释 / Interpreted allowance for one resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Allowance {
    Unlimited,
    Disabled,
    Limited(u64),
}

/// 条件扣减结果 / Outcome of a conditional debit at the storage layer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebitOutcome {
    /// 已扣减 / applied; `used` is the counter after the debit
    Applied { used: u64, allowed: Option<u64> },
    /// 超额拒绝，未修改 / rejected, counter untouched
    Exceeded { used: u64, allowed: u64 },
    /// 订阅不存在 / no such subscription
    Missing,
}

/// 订阅（由计费子系统拥有，本服务只读与扣减）
/// Subscription, owned by billing; this service only reads and debits it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub plan_type: PlanType,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[serde(default)]
    pub allowances: Allowances,
    #[serde(default)]
    pub usage: Usage,
}

impl Subscription {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.end_at
    }

    pub fn allowance(&self, kind: ResourceKind) -> Allowance {
        let raw = match kind {
            ResourceKind::Message => self.allowances.messages,
            ResourceKind::AudioSeconds => self.allowances.audio_seconds,
            ResourceKind::VideoSeconds => self.allowances.video_seconds,
        };
        match raw {
            None => Allowance::Unlimited,
            Some(0) => Allowance::Disabled,
            Some(n) => Allowance::Limited(n),
        }
    }

    pub fn used(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Message => self.usage.messages,
            ResourceKind::AudioSeconds => self.usage.audio_seconds,
            ResourceKind::VideoSeconds => self.usage.video_seconds,
        }
    }

    fn used_mut(&mut self, kind: ResourceKind) -> &mut u64 {
        match kind {
            ResourceKind::Message => &mut self.usage.messages,
            ResourceKind::AudioSeconds => &mut self.usage.audio_seconds,
            ResourceKind::VideoSeconds => &mut self.usage.video_seconds,
        }
    }

    /// 剩余额度，None 表示不限 / Remaining allowance, `None` when unlimited
    pub fn remaining(&self, kind: ResourceKind) -> Option<u64> {
        match self.allowance(kind) {
            Allowance::Unlimited => None,
            Allowance::Disabled => Some(0),
            Allowance::Limited(n) => Some(n.saturating_sub(self.used(kind))),
        }
    }

    /// 条件扣减：仅当扣减后不超额时生效，否则原样拒绝
    /// Conditional debit: applied only if the result stays within the allowance.
    ///
    /// 存储实现必须在同一个原子区间内调用本方法。
    /// Stores must call this inside a single atomic read-modify-write.
    pub fn apply_debit(&mut self, kind: ResourceKind, amount: u64) -> DebitOutcome {
        let used = self.used(kind);
        match self.allowance(kind) {
            Allowance::Unlimited => {
                let counter = self.used_mut(kind);
                *counter = counter.saturating_add(amount);
                DebitOutcome::Applied {
                    used: *counter,
                    allowed: None,
                }
            }
            Allowance::Disabled => DebitOutcome::Exceeded { used, allowed: 0 },
            Allowance::Limited(allowed) => match used.checked_add(amount) {
                Some(next) if next <= allowed => {
                    *self.used_mut(kind) = next;
                    DebitOutcome::Applied {
                        used: next,
                        allowed: Some(allowed),
                    }
                }
                _ => DebitOutcome::Exceeded { used, allowed },
            },
        }
    }

    /// 无条件调整用量（负数用于退还，下限为 0），返回调整后的用量
    /// Unconditional usage adjustment (negative deltas refund, floored at zero)
    pub fn apply_usage_delta(&mut self, kind: ResourceKind, delta: i64) -> u64 {
        let counter = self.used_mut(kind);
        *counter = if delta >= 0 {
            counter.saturating_add(delta as u64)
        } else {
            counter.saturating_sub(delta.unsigned_abs())
        };
        *counter
    }
}
