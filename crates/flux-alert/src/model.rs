use chrono::{DateTime, Utc};
use flux_notify::{NotifyChannel, NotifyLevel};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AlertError, Result};

/// 指标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// 电量（百分比）
    Battery,
    /// 信号强度（百分比）
    Signal,
    /// 设备健康度（百分比）
    DeviceHealth,
    /// 库存水位（百分比）
    Inventory,
    /// 能耗相对基线的变化
    EnergyDelta,
}

/// 指标样本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub device_id: String,
    pub metric_kind: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    /// 滚动基线，仅 `energy_delta` 使用
    #[serde(default)]
    pub baseline: Option<f64>,
}

impl MetricSample {
    pub fn new(device_id: impl Into<String>, metric_kind: MetricKind, value: f64) -> Self {
        Self {
            device_id: device_id.into(),
            metric_kind,
            value,
            timestamp: Utc::now(),
            baseline: None,
        }
    }

    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 检查样本是否可用于评估
    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(AlertError::invalid_sample("device_id is empty"));
        }
        if !self.value.is_finite() {
            return Err(AlertError::invalid_sample(format!(
                "value for device {} is not a finite number",
                self.device_id
            )));
        }
        if let Some(baseline) = self.baseline {
            if !baseline.is_finite() || baseline <= 0.0 {
                return Err(AlertError::invalid_sample(format!(
                    "baseline for device {} must be a positive number, got {}",
                    self.device_id, baseline
                )));
            }
        }
        Ok(())
    }
}

/// 阈值键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKey {
    BatteryLow,
    BatteryVeryLow,
    SignalWeak,
    SignalVeryWeak,
    DeviceHealthWarning,
    DeviceHealthCritical,
    InventoryLow,
    EnergySpike,
}

impl ThresholdKey {
    pub const ALL: [ThresholdKey; 8] = [
        ThresholdKey::BatteryLow,
        ThresholdKey::BatteryVeryLow,
        ThresholdKey::SignalWeak,
        ThresholdKey::SignalVeryWeak,
        ThresholdKey::DeviceHealthWarning,
        ThresholdKey::DeviceHealthCritical,
        ThresholdKey::InventoryLow,
        ThresholdKey::EnergySpike,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdKey::BatteryLow => "battery_low",
            ThresholdKey::BatteryVeryLow => "battery_very_low",
            ThresholdKey::SignalWeak => "signal_weak",
            ThresholdKey::SignalVeryWeak => "signal_very_weak",
            ThresholdKey::DeviceHealthWarning => "device_health_warning",
            ThresholdKey::DeviceHealthCritical => "device_health_critical",
            ThresholdKey::InventoryLow => "inventory_low",
            ThresholdKey::EnergySpike => "energy_spike",
        }
    }

    pub fn metric_kind(&self) -> MetricKind {
        match self {
            ThresholdKey::BatteryLow | ThresholdKey::BatteryVeryLow => MetricKind::Battery,
            ThresholdKey::SignalWeak | ThresholdKey::SignalVeryWeak => MetricKind::Signal,
            ThresholdKey::DeviceHealthWarning | ThresholdKey::DeviceHealthCritical => {
                MetricKind::DeviceHealth
            }
            ThresholdKey::InventoryLow => MetricKind::Inventory,
            ThresholdKey::EnergySpike => MetricKind::EnergyDelta,
        }
    }
}

impl fmt::Display for ThresholdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 阈值越界产生的原始候选告警
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub device_id: String,
    pub metric_kind: MetricKind,
    /// 参与比较的值（能耗为相对基线的百分比）
    pub value: f64,
    pub threshold_key_crossed: ThresholdKey,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

/// 告警优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn is_critical(&self) -> bool {
        *self == Priority::Critical
    }

    pub fn notify_level(&self) -> NotifyLevel {
        match self {
            Priority::Low => NotifyLevel::Info,
            Priority::Medium => NotifyLevel::Warning,
            Priority::High => NotifyLevel::Error,
            Priority::Critical => NotifyLevel::Critical,
        }
    }
}

/// 告警类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    CriticalFailures,
    HighPriorityWarnings,
    MediumWarnings,
    LowPriorityInfo,
    PredictiveMaintenance,
    Inventory,
    Energy,
    Security,
}

impl AlertCategory {
    pub const ALL: [AlertCategory; 8] = [
        AlertCategory::CriticalFailures,
        AlertCategory::HighPriorityWarnings,
        AlertCategory::MediumWarnings,
        AlertCategory::LowPriorityInfo,
        AlertCategory::PredictiveMaintenance,
        AlertCategory::Inventory,
        AlertCategory::Energy,
        AlertCategory::Security,
    ];

    /// 通知标题中使用的名称
    pub fn label(&self) -> &'static str {
        match self {
            AlertCategory::CriticalFailures => "Critical failure",
            AlertCategory::HighPriorityWarnings => "High-priority warning",
            AlertCategory::MediumWarnings => "Warning",
            AlertCategory::LowPriorityInfo => "Info",
            AlertCategory::PredictiveMaintenance => "Predictive maintenance",
            AlertCategory::Inventory => "Inventory",
            AlertCategory::Energy => "Energy",
            AlertCategory::Security => "Security",
        }
    }
}

/// 告警状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Pending,
    Scheduled,
    Dispatched,
    Suppressed,
    Acknowledged,
    Expired,
}

impl AlertState {
    /// 终态：已确认或已过期
    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertState::Acknowledged | AlertState::Expired)
    }
}

/// 抑制原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    QuietHours,
    RateCapped,
}

/// 告警
///
/// 进入终态后所有变更方法都是空操作。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub tenant_id: String,
    pub category: AlertCategory,
    pub priority: Priority,
    pub device_id: String,
    /// 来源阈值，外部直接上报的告警为空
    pub kind: Option<ThresholdKey>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub state: AlertState,

    /// 计划发送时间（`scheduled`）
    pub scheduled_for: Option<DateTime<Utc>>,
    /// 抑制原因与重新评估时间（`suppressed`）
    pub suppressed_reason: Option<SuppressReason>,
    pub suppressed_until: Option<DateTime<Utc>>,

    pub last_dispatched_at: Option<DateTime<Utc>>,
    /// 成功送达的轮次
    pub dispatch_count: u32,
    /// 所有发送轮次（含全部失败的轮次）
    pub delivery_attempts: u32,
    /// 升级重发次数
    pub escalation_level: u32,
    /// 合并进来的候选告警数
    pub occurrences: u32,

    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        tenant_id: impl Into<String>,
        category: AlertCategory,
        priority: Priority,
        device_id: impl Into<String>,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            category,
            priority,
            device_id: device_id.into(),
            kind: None,
            message: message.into(),
            created_at,
            state: AlertState::Pending,
            scheduled_for: None,
            suppressed_reason: None,
            suppressed_until: None,
            last_dispatched_at: None,
            dispatch_count: 0,
            delivery_attempts: 0,
            escalation_level: 0,
            occurrences: 1,
            acknowledged_at: None,
            acknowledged_by: None,
            expired_at: None,
        }
    }

    pub fn with_kind(mut self, kind: ThresholdKey) -> Self {
        self.kind = Some(kind);
        self
    }

    /// 尚未确认且未过期
    pub fn is_open(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.state == AlertState::Acknowledged
    }

    /// 同一 (设备, 类别) 的新候选合并进来
    pub fn merge_occurrence(&mut self, priority: Priority, message: impl Into<String>) {
        if !self.is_open() {
            return;
        }
        self.occurrences += 1;
        self.priority = self.priority.max(priority);
        self.message = message.into();
    }

    pub fn schedule(&mut self, at: DateTime<Utc>) {
        if !self.is_open() {
            return;
        }
        self.state = AlertState::Scheduled;
        self.scheduled_for = Some(at);
        self.suppressed_reason = None;
        self.suppressed_until = None;
    }

    pub fn suppress(&mut self, reason: SuppressReason, until: DateTime<Utc>) {
        if !self.is_open() {
            return;
        }
        self.state = AlertState::Suppressed;
        self.suppressed_reason = Some(reason);
        self.suppressed_until = Some(until);
        self.scheduled_for = None;
    }

    pub fn mark_dispatched(&mut self, at: DateTime<Utc>) {
        if !self.is_open() {
            return;
        }
        self.state = AlertState::Dispatched;
        self.last_dispatched_at = Some(at);
        self.dispatch_count += 1;
        self.scheduled_for = None;
    }

    /// 合并后升为严重：尚未发出的立即到期，已发出未确认的重新进入 `pending`
    ///
    /// 不计入升级次数。
    pub fn expedite(&mut self, now: DateTime<Utc>) {
        match self.state {
            AlertState::Scheduled | AlertState::Suppressed => self.schedule(now),
            AlertState::Dispatched => {
                self.state = AlertState::Pending;
                self.scheduled_for = None;
                self.suppressed_reason = None;
                self.suppressed_until = None;
            }
            _ => {}
        }
    }

    /// 进入终态的时间
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            AlertState::Acknowledged => self.acknowledged_at,
            AlertState::Expired => self.expired_at,
            _ => None,
        }
    }

    /// 升级：重新进入 `pending`
    pub fn reopen(&mut self) {
        if !self.is_open() {
            return;
        }
        self.state = AlertState::Pending;
        self.escalation_level += 1;
        self.scheduled_for = None;
        self.suppressed_reason = None;
        self.suppressed_until = None;
    }

    /// 确认告警，已确认时返回 false 且不改动确认时间
    pub fn acknowledge(&mut self, who: impl Into<String>, at: DateTime<Utc>) -> bool {
        if !self.is_open() {
            return false;
        }
        self.state = AlertState::Acknowledged;
        self.acknowledged_at = Some(at);
        self.acknowledged_by = Some(who.into());
        self.scheduled_for = None;
        self.suppressed_reason = None;
        self.suppressed_until = None;
        true
    }

    pub fn expire(&mut self, at: DateTime<Utc>) {
        if !self.is_open() {
            return;
        }
        self.state = AlertState::Expired;
        self.expired_at = Some(at);
        self.scheduled_for = None;
        self.suppressed_reason = None;
        self.suppressed_until = None;
    }
}

/// 单渠道发送结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    Failed,
    SkippedDisabled,
}

/// 发送记录，每个 (告警, 渠道, 轮次) 一条
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub alert_id: String,
    pub channel: NotifyChannel,
    pub attempted_at: DateTime<Utc>,
    pub outcome: DispatchOutcome,
    pub error: Option<String>,
}

impl DispatchRecord {
    pub fn sent(alert_id: &str, channel: NotifyChannel, at: DateTime<Utc>) -> Self {
        Self {
            alert_id: alert_id.to_string(),
            channel,
            attempted_at: at,
            outcome: DispatchOutcome::Sent,
            error: None,
        }
    }

    pub fn failed(
        alert_id: &str,
        channel: NotifyChannel,
        at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            alert_id: alert_id.to_string(),
            channel,
            attempted_at: at,
            outcome: DispatchOutcome::Failed,
            error: Some(error.into()),
        }
    }

    pub fn skipped(alert_id: &str, channel: NotifyChannel, at: DateTime<Utc>) -> Self {
        Self {
            alert_id: alert_id.to_string(),
            channel,
            attempted_at: at,
            outcome: DispatchOutcome::SkippedDisabled,
            error: None,
        }
    }
}

/// 审计事件（只追加）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    Dispatch(DispatchRecord),
    /// 无人确认而过期
    UnacknowledgedExpired {
        alert_id: String,
        tenant_id: String,
        dispatch_count: u32,
        delivery_attempts: u32,
        at: DateTime<Utc>,
    },
}

impl AuditEvent {
    pub fn alert_id(&self) -> &str {
        match self {
            AuditEvent::Dispatch(record) => &record.alert_id,
            AuditEvent::UnacknowledgedExpired { alert_id, .. } => alert_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> Alert {
        Alert::new(
            "t1",
            AlertCategory::MediumWarnings,
            Priority::Medium,
            "dev-1",
            "Signal weak",
            Utc::now(),
        )
    }

    #[test]
    fn test_sample_validation() {
        assert!(MetricSample::new("dev-1", MetricKind::Battery, 50.0).validate().is_ok());
        assert!(MetricSample::new("", MetricKind::Battery, 50.0).validate().is_err());
        assert!(MetricSample::new("dev-1", MetricKind::Battery, f64::NAN).validate().is_err());
        assert!(MetricSample::new("dev-1", MetricKind::EnergyDelta, 120.0)
            .with_baseline(0.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let mut alert = alert();
        let first = Utc::now();
        assert!(alert.acknowledge("ops", first));

        let later = first + chrono::Duration::minutes(5);
        assert!(!alert.acknowledge("someone-else", later));
        assert_eq!(alert.acknowledged_at, Some(first));
        assert_eq!(alert.acknowledged_by.as_deref(), Some("ops"));
    }

    #[test]
    fn test_terminal_state_is_immutable() {
        let mut alert = alert();
        let now = Utc::now();
        alert.expire(now);

        alert.mark_dispatched(now);
        alert.reopen();
        alert.merge_occurrence(Priority::Critical, "x");
        assert!(!alert.acknowledge("ops", now));

        assert_eq!(alert.state, AlertState::Expired);
        assert_eq!(alert.dispatch_count, 0);
        assert_eq!(alert.priority, Priority::Medium);
    }

    #[test]
    fn test_merge_raises_priority() {
        let mut alert = alert();
        alert.merge_occurrence(Priority::High, "Signal very weak");
        alert.merge_occurrence(Priority::Low, "Signal weak again");

        assert_eq!(alert.occurrences, 3);
        assert_eq!(alert.priority, Priority::High);
        assert_eq!(alert.message, "Signal weak again");
    }
}
