//! 统一错误模型
//! 定义所有错误类型和错误响应格式

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::scheduler::SchedulerError;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// 已有同步周期在运行（reject 策略）
    #[error("Sync cycle already running")]
    SyncBusy,

    /// 排队已满或等待超时（queue 策略）
    #[error("Sync queue unavailable: {0}")]
    SyncUnavailable(String),

    /// 同步周期失败，`stage` 指明失败阶段
    #[error("Sync failed at {stage}: {message}")]
    SyncFailed { stage: String, message: String },
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::SyncBusy => StatusCode::CONFLICT,
            AppError::SyncUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SyncFailed { .. } | AppError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::NotFound(msg) => format!("Resource not found: {}", msg),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::SyncBusy => "A sync cycle is already running".to_string(),
            AppError::SyncUnavailable(msg) => msg.clone(),
            AppError::SyncFailed { stage, .. } => format!("Sync failed at stage {}", stage),
            AppError::Database(_) => "Database error occurred".to_string(),
        }
    }

    /// 失败阶段（仅同步错误）
    pub fn stage(&self) -> Option<&str> {
        match self {
            AppError::SyncFailed { stage, .. } => Some(stage),
            AppError::SyncBusy | AppError::SyncUnavailable(_) => Some("scheduler"),
            _ => None,
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.user_message(),
                stage: self.stage().map(str::to_string),
                request_id,
            },
        };

        // 记录错误日志
        tracing::error!(
            code = self.code(),
            message = %self,
            request_id = %error_response.error.request_id,
            "Application error"
        );

        (status, Json(error_response)).into_response()
    }
}

/// 从 SchedulerError 转换
impl From<SchedulerError> for AppError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Busy => AppError::SyncBusy,
            SchedulerError::QueueFull { .. } | SchedulerError::QueueTimeout(_) => {
                AppError::SyncUnavailable(e.to_string())
            }
            SchedulerError::Cycle(inner) => AppError::SyncFailed {
                stage: inner.stage(),
                message: inner.to_string(),
            },
            SchedulerError::Interrupted(message) => AppError::SyncFailed {
                stage: "scheduler".to_string(),
                message,
            },
        }
    }
}
