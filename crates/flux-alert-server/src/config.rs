use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use flux_alert::{EngineConfig, ServiceConfig};
use flux_notify::providers::{ChatConfig, EmailConfig, PushConfig, SmsConfig};
use flux_notify::Recipient;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 环境变量前缀，例如 `FLUX_ALERT__SERVER__PORT=9000`
const ENV_PREFIX: &str = "FLUX_ALERT";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub settings: SettingsSection,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub recipients: Vec<RecipientConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineSection {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_escalation_interval")]
    pub escalation_interval_secs: u64,
    #[serde(default = "default_sample_buffer")]
    pub sample_buffer: usize,
    /// 单渠道发送超时（毫秒）
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_max_dispatch_count")]
    pub max_dispatch_count: u32,
    /// 已确认/已过期告警保留时长（小时）
    #[serde(default = "default_history_retention_hours")]
    pub history_retention_hours: u64,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettingsSection {
    /// 租户配置目录
    #[serde(default = "default_settings_dir")]
    pub directory: PathBuf,
    /// 监听目录变化并热加载
    #[serde(default = "default_true")]
    pub watch: bool,
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 输出 JSON 格式日志
    #[serde(default)]
    pub json: bool,
}

/// 外部渠道，未配置的渠道不注册通知器
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChannelsConfig {
    pub email: Option<EmailConfig>,
    pub sms: Option<SmsConfig>,
    pub push: Option<PushConfig>,
    pub chat: Option<ChatConfig>,
}

/// 租户联系方式
#[derive(Debug, Deserialize, Clone)]
pub struct RecipientConfig {
    pub tenant_id: String,
    /// 缺省时使用租户 ID
    pub id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub push_token: Option<String>,
    pub chat_handle: Option<String>,
}

impl RecipientConfig {
    pub fn to_recipient(&self) -> Recipient {
        Recipient {
            id: self.id.clone().unwrap_or_else(|| self.tenant_id.clone()),
            email: self.email.clone(),
            phone: self.phone.clone(),
            push_token: self.push_token.clone(),
            chat_handle: self.chat_handle.clone(),
        }
    }
}

impl AppConfig {
    /// 读取配置文件（可缺失）并叠加环境变量
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = Config::builder()
            .add_source(
                File::new(
                    path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                    FileFormat::Toml,
                )
                .required(false),
            )
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.tick_interval_secs == 0 {
            return Err(anyhow!("engine.tick_interval_secs must be greater than 0"));
        }
        if self.engine.escalation_interval_secs == 0 {
            return Err(anyhow!("engine.escalation_interval_secs must be greater than 0"));
        }
        if self.engine.max_dispatch_count == 0 {
            return Err(anyhow!("engine.max_dispatch_count must be greater than 0"));
        }
        if let Some(r) = self.recipients.iter().find(|r| r.tenant_id.trim().is_empty()) {
            return Err(anyhow!("recipient {:?} has an empty tenant_id", r.id));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_dispatch_count: self.engine.max_dispatch_count,
            history_retention_hours: self.engine.history_retention_hours,
            max_history: self.engine.max_history,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            tick_interval_secs: self.engine.tick_interval_secs,
            escalation_interval_secs: self.engine.escalation_interval_secs,
            sample_buffer: self.engine.sample_buffer,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.send_timeout_ms)
    }
}

// 默认值函数
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_tick_interval() -> u64 {
    5
}

fn default_escalation_interval() -> u64 {
    60
}

fn default_sample_buffer() -> usize {
    1024
}

fn default_send_timeout_ms() -> u64 {
    10_000
}

fn default_max_dispatch_count() -> u32 {
    flux_alert::DEFAULT_MAX_DISPATCH_COUNT
}

fn default_history_retention_hours() -> u64 {
    flux_alert::DEFAULT_HISTORY_RETENTION_HOURS
}

fn default_max_history() -> usize {
    flux_alert::DEFAULT_MAX_HISTORY
}

fn default_settings_dir() -> PathBuf {
    PathBuf::from("./data/settings")
}

fn default_true() -> bool {
    true
}

fn default_max_versions() -> usize {
    flux_alert_config::DEFAULT_MAX_VERSIONS
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default trait 实现
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            escalation_interval_secs: default_escalation_interval(),
            sample_buffer: default_sample_buffer(),
            send_timeout_ms: default_send_timeout_ms(),
            max_dispatch_count: default_max_dispatch_count(),
            history_retention_hours: default_history_retention_hours(),
            max_history: default_max_history(),
        }
    }
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            directory: default_settings_dir(),
            watch: default_true(),
            max_versions: default_max_versions(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
