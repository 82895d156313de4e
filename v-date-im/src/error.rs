use thiserror::Error;
use v::http::HttpError;

use crate::domain::ErrorKind;

/// 核心错误类型 / Core error taxonomy
#[derive(Debug, Error)]
pub enum ImError {
    /// 凭证缺失、无效或过期 / Missing, invalid or expired credential
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// 无有效订阅或已过期 / No active subscription, or it expired
    #[error("subscription unavailable: {0}")]
    Subscription(String),
    /// 某项资源额度用尽 / A specific resource allowance is exhausted
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    /// 对方不在线（仅限需要即时性的操作）/ Peer has no live connection
    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),
    #[error("validation failed: {0}")]
    Validation(String),
    /// 额度已预留后持久化失败 / Storage write failed after quota was reserved
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ImResult<T> = Result<T, ImError>;

impl ImError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImError::Authentication(_) => ErrorKind::Authentication,
            ImError::Subscription(_) => ErrorKind::Subscription,
            ImError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            ImError::PeerUnavailable(_) => ErrorKind::PeerUnavailable,
            ImError::Validation(_) => ErrorKind::Validation,
            ImError::Persistence(_) => ErrorKind::Persistence,
            ImError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 对客户端可见的文本；持久化与内部错误不外泄细节
    /// Client-facing message; persistence and internal failures stay generic
    pub fn public_message(&self) -> String {
        match self {
            ImError::Authentication(m)
            | ImError::Subscription(m)
            | ImError::QuotaExceeded(m)
            | ImError::PeerUnavailable(m)
            | ImError::Validation(m) => m.clone(),
            ImError::Persistence(_) => "message could not be saved, please retry".to_string(),
            ImError::Internal(_) => "internal server error".to_string(),
        }
    }

    pub fn to_http(&self) -> HttpError {
        let kind = self.kind().as_str().to_string();
        let message = self.public_message();
        match self {
            ImError::Authentication(_) => HttpError::Unauthorized { kind, message },
            ImError::QuotaExceeded(_) => HttpError::PaymentRequired { kind, message },
            ImError::Subscription(_) => HttpError::Forbidden { kind, message },
            ImError::PeerUnavailable(_) => HttpError::Conflict { kind, message },
            ImError::Validation(m) => HttpError::Validation(vec![v::http::FieldError::new(
                "request", "invalid", m.clone(),
            )]),
            ImError::Persistence(_) | ImError::Internal(_) => HttpError::Internal { kind, message },
        }
    }
}

impl actix_web::ResponseError for ImError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(self.to_http().status_code())
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        v::response::respond_error(&self.to_http())
    }
}
