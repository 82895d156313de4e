use actix_web::{http::StatusCode, HttpResponse};

use crate::http::HttpError;

// 通用 JSON 响应封装 / Generic JSON response helpers

/// 结构体自动转 JSON，失败则退化为调试文本
/// Serialize `data` as JSON, falling back to its debug text
pub fn respond_any<T: serde::Serialize + std::fmt::Debug>(code: StatusCode, data: T) -> HttpResponse {
    match serde_json::to_value(&data) {
        Ok(v) => HttpResponse::build(code).json(v),
        Err(_) => HttpResponse::build(code)
            .content_type("text/plain; charset=utf-8")
            .body(format!("{:?}", data)),
    }
}

/// 200 + JSON
pub fn respond_ok<T: serde::Serialize + std::fmt::Debug>(data: T) -> HttpResponse {
    respond_any(StatusCode::OK, data)
}

/// 统一错误体 / Uniform error body
pub fn respond_error(err: &HttpError) -> HttpResponse {
    let code = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(code).json(err.to_body())
}
