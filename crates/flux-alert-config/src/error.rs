use flux_alert::ValidationErrors;
use thiserror::Error;

/// 配置存储错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置校验失败，未提交
    #[error("Invalid settings: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Version {version} not found for tenant {tenant_id}")]
    VersionNotFound { tenant_id: String, version: u64 },

    #[error("Invalid tenant id: {0:?}")]
    InvalidTenant(String),

    /// 配置源读写失败
    #[error("Settings source error: {0}")]
    Source(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// 租户 ID 只允许字母、数字、`-`、`_`、`.`，且不能以 `.` 开头
pub fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    let valid = !tenant_id.is_empty()
        && tenant_id.len() <= 128
        && !tenant_id.starts_with('.')
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidTenant(tenant_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_rules() {
        assert!(validate_tenant_id("acme-01").is_ok());
        assert!(validate_tenant_id("site_3.east").is_ok());
        assert!(validate_tenant_id("").is_err());
        assert!(validate_tenant_id("../etc").is_err());
        assert!(validate_tenant_id("a/b").is_err());
        assert!(validate_tenant_id(".hidden").is_err());
    }
}
