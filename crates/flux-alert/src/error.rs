use crate::validator::ValidationErrors;
use thiserror::Error;

/// 告警引擎错误类型
#[derive(Error, Debug)]
pub enum AlertError {
    /// 告警未找到
    #[error("Alert not found: {0}")]
    NotFound(String),

    /// 指标样本格式错误
    #[error("Invalid metric sample: {0}")]
    InvalidSample(String),

    /// 配置校验失败
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// 租户配置不可用
    #[error("Settings unavailable for tenant {tenant_id}: {reason}")]
    SettingsUnavailable { tenant_id: String, reason: String },

    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 告警引擎结果类型
pub type Result<T> = std::result::Result<T, AlertError>;

impl AlertError {
    /// 创建样本错误
    pub fn invalid_sample(msg: impl Into<String>) -> Self {
        AlertError::InvalidSample(msg.into())
    }
}
