use chrono::{DateTime, Utc};
use flux_alert::{Alert, AlertState, MetricKind, MetricSample, NotificationSettings, SettingsPatch};
use flux_alert_config::{SettingsSection, SettingsVersion};
use serde::{Deserialize, Serialize};

/// 配置更新请求（其余字段为部分更新内容）
#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub author: Option<String>,
    pub comment: Option<String>,
    #[serde(flatten)]
    pub patch: SettingsPatch,
}

/// 回滚请求参数
#[derive(Debug, Deserialize)]
pub struct RollbackQuery {
    pub author: Option<String>,
}

/// 配置版本响应
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub comment: String,
    pub changed: Vec<SettingsSection>,
    pub settings: NotificationSettings,
}

impl From<SettingsVersion> for VersionResponse {
    fn from(v: SettingsVersion) -> Self {
        Self {
            version: v.version,
            timestamp: v.timestamp,
            author: v.author,
            comment: v.comment,
            changed: v.changed,
            settings: v.settings,
        }
    }
}

/// 版本历史查询参数
#[derive(Debug, Deserialize)]
pub struct VersionsQuery {
    /// 只返回改动过该分区的版本
    pub section: Option<SettingsSection>,
}

/// 指标样本上报请求
#[derive(Debug, Deserialize)]
pub struct SampleRequest {
    pub device_id: String,
    pub metric_kind: MetricKind,
    pub value: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub baseline: Option<f64>,
}

impl From<SampleRequest> for MetricSample {
    fn from(req: SampleRequest) -> Self {
        let mut sample = MetricSample::new(req.device_id, req.metric_kind, req.value);
        if let Some(timestamp) = req.timestamp {
            sample = sample.at(timestamp);
        }
        if let Some(baseline) = req.baseline {
            sample = sample.with_baseline(baseline);
        }
        sample
    }
}

/// 批量入队结果
#[derive(Debug, Serialize)]
pub struct QueuedSamples {
    pub queued: usize,
}

/// 样本或外部告警的处理结果，未产生告警时 `alert` 为空
#[derive(Debug, Serialize)]
pub struct AlertOutcome {
    pub alert: Option<Alert>,
}

/// 告警查询参数
#[derive(Debug, Deserialize)]
pub struct ListAlertsQuery {
    pub state: Option<AlertState>,
}

/// 确认请求
#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub who: String,
    pub when: Option<DateTime<Utc>>,
}
