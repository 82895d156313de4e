use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 账号角色 / Account role as reported by the auth center
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    Admin,
}

/// 已验证身份 / A validated identity
///
/// 代理（agent）可通过子账号行事：此时子账号是对外身份，监督者是真实操作者，
/// 所有审计都记在监督者名下。
/// An agent may act through a sub-identity; the sub-identity is who peers see,
/// the supervisor is the real actor every audit record is attributed to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Real { user_id: String, role: Role },
    Impersonated { sub_user_id: String, supervisor_id: String },
}

impl Identity {
    /// 对外身份（在线状态、消息发送者）/ The identity peers see
    pub fn acting_user(&self) -> &str {
        match self {
            Identity::Real { user_id, .. } => user_id,
            Identity::Impersonated { sub_user_id, .. } => sub_user_id,
        }
    }

    /// 真实操作者 / The actor accountable for the action
    pub fn actor(&self) -> &str {
        match self {
            Identity::Real { user_id, .. } => user_id,
            Identity::Impersonated { supervisor_id, .. } => supervisor_id,
        }
    }

    pub fn supervisor(&self) -> Option<&str> {
        match self {
            Identity::Real { .. } => None,
            Identity::Impersonated { supervisor_id, .. } => Some(supervisor_id),
        }
    }
}
