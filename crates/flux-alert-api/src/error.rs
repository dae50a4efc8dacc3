use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use flux_alert::AlertError;
use flux_alert_config::ConfigError;
use serde_json::json;
use std::fmt;

/// API 错误类型
#[derive(Debug)]
pub enum ApiError {
    /// 告警未找到
    AlertNotFound(String),
    /// 配置版本未找到
    VersionNotFound(String),
    /// 验证错误
    ValidationError(String),
    /// 请求错误
    BadRequest(String),
    /// 配置暂不可用
    Unavailable(String),
    /// 内部错误
    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::AlertNotFound(id) => write!(f, "Alert not found: {}", id),
            ApiError::VersionNotFound(msg) => write!(f, "{}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::AlertNotFound(_) | ApiError::VersionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ValidationError(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

// 从 flux_alert::AlertError 转换
impl From<AlertError> for ApiError {
    fn from(err: AlertError) -> Self {
        match err {
            AlertError::NotFound(id) => ApiError::AlertNotFound(id),
            AlertError::InvalidSample(msg) => ApiError::BadRequest(msg),
            AlertError::Validation(errors) => ApiError::ValidationError(errors.to_string()),
            err @ AlertError::SettingsUnavailable { .. } => ApiError::Unavailable(err.to_string()),
            AlertError::Other(err) => ApiError::InternalError(err.to_string()),
        }
    }
}

// 从 flux_alert_config::ConfigError 转换
impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation(errors) => ApiError::ValidationError(errors.to_string()),
            err @ ConfigError::VersionNotFound { .. } => ApiError::VersionNotFound(err.to_string()),
            ConfigError::InvalidTenant(id) => ApiError::BadRequest(format!("invalid tenant id {:?}", id)),
            ConfigError::Source(err) => ApiError::InternalError(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
