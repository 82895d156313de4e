use serde::{Deserialize, Serialize};

/// 字段级校验错误 / Field-level validation error
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: Some(message.into()),
        }
    }
}

/// 统一错误响应体 / Uniform error response body
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorBody {
    /// 机器可读的错误类别 / Machine-readable kind, e.g. `quota_exceeded`
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

#[derive(Debug, Clone)]
pub enum HttpError {
    Unauthorized { kind: String, message: String },
    PaymentRequired { kind: String, message: String },
    Forbidden { kind: String, message: String },
    NotFound { kind: String, message: String },
    Conflict { kind: String, message: String },
    Validation(Vec<FieldError>),
    Internal { kind: String, message: String },
}

impl HttpError {
    pub fn status_code(&self) -> u16 {
        match self {
            HttpError::Unauthorized { .. } => 401,
            HttpError::PaymentRequired { .. } => 402,
            HttpError::Forbidden { .. } => 403,
            HttpError::NotFound { .. } => 404,
            HttpError::Conflict { .. } => 409,
            HttpError::Validation(_) => 422,
            HttpError::Internal { .. } => 500,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        match self {
            HttpError::Unauthorized { kind, message }
            | HttpError::PaymentRequired { kind, message }
            | HttpError::Forbidden { kind, message }
            | HttpError::NotFound { kind, message }
            | HttpError::Conflict { kind, message }
            | HttpError::Internal { kind, message } => ErrorBody {
                kind: kind.clone(),
                message: message.clone(),
                errors: None,
            },
            HttpError::Validation(errors) => ErrorBody {
                kind: "validation".to_string(),
                message: "Validation Failed".to_string(),
                errors: Some(errors.clone()),
            },
        }
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = self.to_body();
        write!(f, "{} ({}): {}", self.status_code(), body.kind, body.message)
    }
}

#[cfg(feature = "web_actix")]
impl actix_web::ResponseError for HttpError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(HttpError::status_code(self))
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        actix_web::HttpResponse::build(actix_web::ResponseError::status_code(self)).json(self.to_body())
    }
}
