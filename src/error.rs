//! 统一的 API 错误类型与转换。

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::io;
use thiserror::Error;

use crate::settings::SettingsError;

pub const CODE_AUTH_REQUIRED: &str = "AUTH_REQUIRED";
pub const CODE_AUTH_INVALID: &str = "AUTH_INVALID";
pub const CODE_AUTH_RATE_LIMITED: &str = "AUTH_RATE_LIMITED";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized {
        message: String,
        code: &'static str,
    },
    Forbidden {
        message: String,
        code: Option<&'static str>,
    },
    NotFound(String),
    RangeNotSatisfiable(u64),
    TooManyRequests {
        message: String,
        retry_after: u64,
    },
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl ApiError {
    /// 路径越界或无法解析时的统一拒绝。
    pub fn sandbox() -> Self {
        Self::forbidden("无权限访问此路径")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden {
            message: message.into(),
            code: None,
        }
    }

    pub fn auth_required(message: impl Into<String>) -> Self {
        ApiError::Unauthorized {
            message: message.into(),
            code: CODE_AUTH_REQUIRED,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut headers = HeaderMap::new();
        let (message, code, retry_after) = match &self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::Internal(msg) => {
                (msg.as_str(), None, None)
            }
            ApiError::Unauthorized { message, code } => (message.as_str(), Some(*code), None),
            ApiError::Forbidden { message, code } => (message.as_str(), *code, None),
            ApiError::RangeNotSatisfiable(size) => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    headers.insert(header::CONTENT_RANGE, value);
                }
                ("请求范围无效", None, None)
            }
            ApiError::TooManyRequests {
                message,
                retry_after,
            } => {
                if *retry_after > 0
                    && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
                {
                    headers.insert(header::RETRY_AFTER, value);
                }
                (
                    message.as_str(),
                    Some(CODE_AUTH_RATE_LIMITED),
                    Some(*retry_after),
                )
            }
        };
        let body = ErrorBody {
            error: message,
            code,
            retry_after,
        };
        (status, headers, Json(body)).into_response()
    }
}

/// 共享服务生命周期错误，`Display` 即面向桌面端的提示文本。
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("共享文件夹路径为空")]
    EmptyFolder,
    #[error("共享路径不是文件夹")]
    NotADirectory,
    #[error("共享文件夹不可访问: {0}")]
    FolderUnavailable(#[source] io::Error),
    #[error("未找到可用的 IPv4 地址")]
    NoLocalAddress,
    #[error("端口不能为空")]
    EmptyPort,
    #[error("端口无效（1-65535）")]
    InvalidPort,
    #[error("端口不可用")]
    PortUnavailable(#[source] io::Error),
    #[error("本地服务器未启用")]
    NotRunning,
    #[error("无效的设置键")]
    InvalidSettingKey,
    #[error("启动服务失败: {0}")]
    Listen(#[source] io::Error),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}
