use async_trait::async_trait;
use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use flux_notify::NotifyChannel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::{AlertCategory, Priority, ThresholdKey};
use crate::validator::{SettingsValidator, ValidationErrors};

/// 通知配置（每个租户一份）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub thresholds: Thresholds,

    /// 类别开关
    #[serde(default = "default_alert_types")]
    pub alert_types: BTreeMap<AlertCategory, bool>,

    /// 渠道开关
    #[serde(default = "default_channels")]
    pub channels: BTreeMap<NotifyChannel, bool>,

    #[serde(default)]
    pub frequency: FrequencyPolicy,

    /// 阈值到优先级的映射，缺失时使用内置默认值
    #[serde(default = "default_priorities")]
    pub priorities: BTreeMap<ThresholdKey, Priority>,

    /// 本地时间相对 UTC 的偏移（分钟），用于免打扰时段
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            alert_types: default_alert_types(),
            channels: default_channels(),
            frequency: FrequencyPolicy::default(),
            priorities: default_priorities(),
            utc_offset_minutes: 0,
        }
    }
}

impl NotificationSettings {
    /// 类别是否启用（未配置的类别视为启用）
    pub fn is_category_enabled(&self, category: AlertCategory) -> bool {
        self.alert_types.get(&category).copied().unwrap_or(true)
    }

    /// 渠道是否启用（未配置的渠道视为关闭）
    pub fn is_channel_enabled(&self, channel: NotifyChannel) -> bool {
        self.channels.get(&channel).copied().unwrap_or(false)
    }

    /// 阈值对应的优先级
    pub fn priority_for(&self, key: ThresholdKey) -> Priority {
        self.priorities
            .get(&key)
            .copied()
            .unwrap_or_else(|| default_priority(key))
    }

    /// 租户本地时区
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// 使用标准规则校验
    pub fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        SettingsValidator::standard().validate(self)
    }

    /// 应用部分更新，返回新配置（不做校验）
    pub fn apply(&self, patch: &SettingsPatch) -> NotificationSettings {
        let mut next = self.clone();

        for (key, value) in &patch.thresholds {
            next.thresholds.set(*key, *value);
        }
        next.alert_types
            .extend(patch.alert_types.iter().map(|(k, v)| (*k, *v)));
        next.channels
            .extend(patch.channels.iter().map(|(k, v)| (*k, *v)));
        next.priorities
            .extend(patch.priorities.iter().map(|(k, v)| (*k, *v)));

        if let Some(frequency) = &patch.frequency {
            let f = &mut next.frequency;
            if let Some(mode) = frequency.mode {
                f.mode = mode;
            }
            if let Some(v) = frequency.batch_interval_minutes {
                f.batch_interval_minutes = v;
            }
            if let Some(v) = frequency.quiet_hours_enabled {
                f.quiet_hours_enabled = v;
            }
            if let Some(v) = frequency.quiet_hours_start {
                f.quiet_hours_start = v;
            }
            if let Some(v) = frequency.quiet_hours_end {
                f.quiet_hours_end = v;
            }
            if let Some(v) = frequency.max_per_hour {
                f.max_per_hour = v;
            }
            if let Some(v) = frequency.repeat_interval_minutes {
                f.repeat_interval_minutes = v;
            }
        }

        if let Some(offset) = patch.utc_offset_minutes {
            next.utc_offset_minutes = offset;
        }

        next
    }
}

/// 阈值（百分比；`energy_spike` 为相对基线的增幅百分比）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub battery_low: f64,
    pub battery_very_low: f64,
    pub signal_weak: f64,
    pub signal_very_weak: f64,
    pub device_health_warning: f64,
    pub device_health_critical: f64,
    pub inventory_low: f64,
    pub energy_spike: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            battery_low: 20.0,
            battery_very_low: 10.0,
            signal_weak: 30.0,
            signal_very_weak: 15.0,
            device_health_warning: 70.0,
            device_health_critical: 40.0,
            inventory_low: 20.0,
            energy_spike: 25.0,
        }
    }
}

impl Thresholds {
    pub fn get(&self, key: ThresholdKey) -> f64 {
        match key {
            ThresholdKey::BatteryLow => self.battery_low,
            ThresholdKey::BatteryVeryLow => self.battery_very_low,
            ThresholdKey::SignalWeak => self.signal_weak,
            ThresholdKey::SignalVeryWeak => self.signal_very_weak,
            ThresholdKey::DeviceHealthWarning => self.device_health_warning,
            ThresholdKey::DeviceHealthCritical => self.device_health_critical,
            ThresholdKey::InventoryLow => self.inventory_low,
            ThresholdKey::EnergySpike => self.energy_spike,
        }
    }

    pub fn set(&mut self, key: ThresholdKey, value: f64) {
        let slot = match key {
            ThresholdKey::BatteryLow => &mut self.battery_low,
            ThresholdKey::BatteryVeryLow => &mut self.battery_very_low,
            ThresholdKey::SignalWeak => &mut self.signal_weak,
            ThresholdKey::SignalVeryWeak => &mut self.signal_very_weak,
            ThresholdKey::DeviceHealthWarning => &mut self.device_health_warning,
            ThresholdKey::DeviceHealthCritical => &mut self.device_health_critical,
            ThresholdKey::InventoryLow => &mut self.inventory_low,
            ThresholdKey::EnergySpike => &mut self.energy_spike,
        };
        *slot = value;
    }
}

/// 调度模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// 按优先级和近期告警量自动选择立即或批量
    Smart,
    Immediate,
    Batched,
    /// 强制执行免打扰时段
    Quiet,
}

/// 频率策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyPolicy {
    pub mode: ScheduleMode,
    pub batch_interval_minutes: u32,
    pub quiet_hours_enabled: bool,
    #[serde(with = "hhmm")]
    pub quiet_hours_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub quiet_hours_end: NaiveTime,
    pub max_per_hour: u32,
    pub repeat_interval_minutes: u32,
}

impl Default for FrequencyPolicy {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::Smart,
            batch_interval_minutes: 15,
            quiet_hours_enabled: false,
            quiet_hours_start: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
            quiet_hours_end: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
            max_per_hour: 10,
            repeat_interval_minutes: 30,
        }
    }
}

impl FrequencyPolicy {
    /// 免打扰时段是否生效（`quiet` 模式总是生效）
    pub fn quiet_hours_active(&self) -> bool {
        self.quiet_hours_enabled || self.mode == ScheduleMode::Quiet
    }
}

/// 部分更新
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    pub thresholds: BTreeMap<ThresholdKey, f64>,
    pub alert_types: BTreeMap<AlertCategory, bool>,
    pub channels: BTreeMap<NotifyChannel, bool>,
    pub frequency: Option<FrequencyPatch>,
    pub priorities: BTreeMap<ThresholdKey, Priority>,
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyPatch {
    pub mode: Option<ScheduleMode>,
    pub batch_interval_minutes: Option<u32>,
    pub quiet_hours_enabled: Option<bool>,
    #[serde(with = "hhmm::option")]
    pub quiet_hours_start: Option<NaiveTime>,
    #[serde(with = "hhmm::option")]
    pub quiet_hours_end: Option<NaiveTime>,
    pub max_per_hour: Option<u32>,
    pub repeat_interval_minutes: Option<u32>,
}

/// 配置读取接口，由配置存储实现
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn get_settings(&self, tenant_id: &str) -> Result<NotificationSettings>;
}

/// 阈值默认优先级
pub fn default_priority(key: ThresholdKey) -> Priority {
    match key {
        ThresholdKey::BatteryVeryLow => Priority::Critical,
        ThresholdKey::BatteryLow => Priority::Medium,
        ThresholdKey::SignalVeryWeak => Priority::High,
        ThresholdKey::SignalWeak => Priority::Low,
        ThresholdKey::DeviceHealthCritical => Priority::Critical,
        ThresholdKey::DeviceHealthWarning => Priority::Medium,
        ThresholdKey::InventoryLow => Priority::Medium,
        ThresholdKey::EnergySpike => Priority::High,
    }
}

fn default_priorities() -> BTreeMap<ThresholdKey, Priority> {
    ThresholdKey::ALL
        .iter()
        .map(|key| (*key, default_priority(*key)))
        .collect()
}

fn default_alert_types() -> BTreeMap<AlertCategory, bool> {
    AlertCategory::ALL.iter().map(|c| (*c, true)).collect()
}

fn default_channels() -> BTreeMap<NotifyChannel, bool> {
    NotifyChannel::ALL
        .iter()
        .map(|c| {
            let enabled = matches!(c, NotifyChannel::InApp | NotifyChannel::Email | NotifyChannel::Push);
            (*c, enabled)
        })
        .collect()
}

/// "HH:MM" 格式的时刻，读取时也接受 "HH:MM:SS"
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn parse(s: &str) -> Result<NaiveTime, chrono::ParseError> {
        NaiveTime::parse_from_str(s, FORMAT).or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            time: &Option<NaiveTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match time {
                Some(t) => super::serialize(t, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveTime>, D::Error> {
            let s = Option::<String>::deserialize(deserializer)?;
            s.map(|s| super::parse(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
