use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};

use crate::domain::CallType;
use crate::error::{ImError, ImResult};
use crate::quota::{CallUsageLedger, StopReport};
use crate::routing::validate_user_id;

type HmacSha256 = Hmac<Sha256>;

/// 签名请求头 / Signature header name
pub const SIGNATURE_HEADER: &str = "X-Signature";
const SIGNATURE_PREFIX: &str = "sha256=";

/// 外部通话基础设施上报的通话结束事件
/// Call-finished report from the external call infrastructure
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CallWebhook {
    pub call_id: String,
    pub call_type: CallType,
    pub participants: Vec<String>,
    pub duration_seconds: f64,
}

/// 每个参与者的结算结果 / Settlement result per participant
#[derive(Clone, Debug, Serialize)]
pub struct ParticipantSettlement {
    pub user_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<StopReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// 生成签名 / Sign a raw body
pub fn sign(secret: &str, body: &[u8]) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(body);
    Ok(format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes())))
}

/// 校验 `sha256=<hex>` 签名（常量时间比较）
/// Verify a `sha256=<hex>` signature in constant time
pub fn verify_signature(secret: Option<&str>, body: &[u8], header: Option<&str>) -> bool {
    let (Some(secret), Some(header)) = (secret, header) else {
        return false;
    };
    let Some(hex_sig) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// 按上报时长为每个参与者分别结算 / Settle the reported duration per participant
pub async fn settle_call(usage: &CallUsageLedger, hook: &CallWebhook) -> ImResult<Vec<ParticipantSettlement>> {
    if hook.call_id.trim().is_empty() {
        return Err(ImError::Validation("call_id is required".to_string()));
    }
    if hook.participants.is_empty() {
        return Err(ImError::Validation("participants is empty".to_string()));
    }
    for p in &hook.participants {
        validate_user_id("participants", p)?;
    }
    let mut participants = hook.participants.clone();
    participants.sort();
    participants.dedup();

    let results = usage.settle(&participants, hook.call_type, hook.duration_seconds).await;
    let out: Vec<ParticipantSettlement> = results
        .into_iter()
        .map(|(user_id, r)| match r {
            Ok(report) => ParticipantSettlement {
                user_id,
                ok: true,
                report: Some(report),
                error: None,
            },
            Err(e) => {
                warn!(call_id = %hook.call_id, user_id = %user_id, "call settlement failed: {}", e);
                ParticipantSettlement {
                    user_id,
                    ok: false,
                    report: None,
                    error: Some(e.public_message()),
                }
            }
        })
        .collect();
    info!(call_id = %hook.call_id, participants = out.len(), duration = hook.duration_seconds, "🪝 call webhook settled");
    Ok(out)
}
