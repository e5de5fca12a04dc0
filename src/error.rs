use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::validation::FieldError;

#[derive(Debug)]
pub enum AppError {
    /// 校验失败，返回 {field, message} 列表
    Validation(Vec<FieldError>),
    /// 实体不存在，参数为实体名
    NotFound(&'static str),
    Unauthorized,
    /// 意外错误，详情只写日志，客户端收到通用消息
    Internal(String),
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(errors) => {
                (StatusCode::BAD_REQUEST, Json(errors)).into_response()
            }
            AppError::NotFound(entity) => (
                StatusCode::NOT_FOUND,
                Json(MessageResponse {
                    message: format!("{entity} not found"),
                }),
            )
                .into_response(),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(MessageResponse {
                    message: "Unauthorized".into(),
                }),
            )
                .into_response(),
            AppError::Internal(detail) => {
                tracing::error!("internal error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(MessageResponse {
                        message: "An internal error occurred".into(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// 未匹配到路由
pub async fn handle_404() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(MessageResponse {
            message: "The requested endpoint was not found".into(),
        }),
    )
        .into_response()
}
