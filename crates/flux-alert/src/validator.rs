use std::fmt;
use thiserror::Error;

use crate::model::ThresholdKey;
use crate::settings::NotificationSettings;

/// 校验错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Value out of range: {field} = {value}, expected {min}..={max}")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Inverted thresholds: {stricter} ({stricter_value}) must be stricter than {looser} ({looser_value})")]
    InvertedThresholds {
        stricter: ThresholdKey,
        stricter_value: f64,
        looser: ThresholdKey,
        looser_value: f64,
    },

    #[error("Invalid time window: {0}")]
    InvalidWindow(String),

    #[error("Custom validation failed: {0}")]
    Custom(String),
}

/// 所有未通过的规则
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrors(pub Vec<(String, ValidationError)>);

impl ValidationErrors {
    pub fn messages(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(rule, e)| format!("[{}] {}", rule, e))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed: {}", self.messages().join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// 校验规则
pub trait ValidationRule: Send + Sync {
    fn validate(&self, settings: &NotificationSettings) -> Result<(), ValidationError>;
    fn name(&self) -> &str;
}

/// 配置校验器
pub struct SettingsValidator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl SettingsValidator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// 内置规则：阈值范围与严格程度、频率参数范围、免打扰时段
    pub fn standard() -> Self {
        let mut validator = Self::new();

        for key in ThresholdKey::ALL {
            let max = if key == ThresholdKey::EnergySpike { 1000.0 } else { 100.0 };
            let min = if key == ThresholdKey::EnergySpike { f64::MIN_POSITIVE } else { 0.0 };
            validator.add_rule(Box::new(RangeRule::new(
                format!("{}_range", key),
                key.as_str(),
                move |s: &NotificationSettings| s.thresholds.get(key),
                min,
                max,
            )));
        }

        validator.add_rule(Box::new(ThresholdOrderRule::new(
            ThresholdKey::BatteryVeryLow,
            ThresholdKey::BatteryLow,
        )));
        validator.add_rule(Box::new(ThresholdOrderRule::new(
            ThresholdKey::SignalVeryWeak,
            ThresholdKey::SignalWeak,
        )));
        validator.add_rule(Box::new(ThresholdOrderRule::new(
            ThresholdKey::DeviceHealthCritical,
            ThresholdKey::DeviceHealthWarning,
        )));

        validator.add_rule(Box::new(RangeRule::new(
            "batch_interval_range",
            "frequency.batch_interval_minutes",
            |s: &NotificationSettings| s.frequency.batch_interval_minutes as f64,
            1.0,
            1440.0,
        )));
        validator.add_rule(Box::new(RangeRule::new(
            "max_per_hour_range",
            "frequency.max_per_hour",
            |s: &NotificationSettings| s.frequency.max_per_hour as f64,
            1.0,
            1000.0,
        )));
        validator.add_rule(Box::new(RangeRule::new(
            "repeat_interval_range",
            "frequency.repeat_interval_minutes",
            |s: &NotificationSettings| s.frequency.repeat_interval_minutes as f64,
            1.0,
            10080.0,
        )));
        validator.add_rule(Box::new(RangeRule::new(
            "utc_offset_range",
            "utc_offset_minutes",
            |s: &NotificationSettings| s.utc_offset_minutes as f64,
            -840.0,
            840.0,
        )));

        validator.add_rule(Box::new(CustomRule::new(
            "quiet_hours_window",
            |s: &NotificationSettings| {
                let f = &s.frequency;
                if f.quiet_hours_active() && f.quiet_hours_start == f.quiet_hours_end {
                    Err(ValidationError::InvalidWindow(format!(
                        "quiet hours start and end are both {}",
                        f.quiet_hours_start.format("%H:%M")
                    )))
                } else {
                    Ok(())
                }
            },
        )));

        validator
    }

    /// 添加校验规则
    pub fn add_rule(&mut self, rule: Box<dyn ValidationRule>) {
        self.rules.push(rule);
    }

    /// 执行所有校验规则，收集全部错误
    pub fn validate(&self, settings: &NotificationSettings) -> Result<(), ValidationErrors> {
        let errors: Vec<_> = self
            .rules
            .iter()
            .filter_map(|rule| {
                rule.validate(settings)
                    .err()
                    .map(|e| (rule.name().to_string(), e))
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }

    /// 获取规则数量
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for SettingsValidator {
    fn default() -> Self {
        Self::standard()
    }
}

/// 范围校验规则
pub struct RangeRule<F>
where
    F: Fn(&NotificationSettings) -> f64 + Send + Sync,
{
    name: String,
    field_name: String,
    extractor: F,
    min: f64,
    max: f64,
}

impl<F> RangeRule<F>
where
    F: Fn(&NotificationSettings) -> f64 + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        field_name: impl Into<String>,
        extractor: F,
        min: f64,
        max: f64,
    ) -> Self {
        Self {
            name: name.into(),
            field_name: field_name.into(),
            extractor,
            min,
            max,
        }
    }
}

impl<F> ValidationRule for RangeRule<F>
where
    F: Fn(&NotificationSettings) -> f64 + Send + Sync,
{
    fn validate(&self, settings: &NotificationSettings) -> Result<(), ValidationError> {
        let value = (self.extractor)(settings);

        // NaN 也会落在这里
        if !(value >= self.min && value <= self.max) {
            return Err(ValidationError::OutOfRange {
                field: self.field_name.clone(),
                value: value.to_string(),
                min: self.min.to_string(),
                max: self.max.to_string(),
            });
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 严格阈值必须低于宽松阈值（电量、信号、健康度均为"越低越差"）
pub struct ThresholdOrderRule {
    name: String,
    stricter: ThresholdKey,
    looser: ThresholdKey,
}

impl ThresholdOrderRule {
    pub fn new(stricter: ThresholdKey, looser: ThresholdKey) -> Self {
        Self {
            name: format!("{}_below_{}", stricter, looser),
            stricter,
            looser,
        }
    }
}

impl ValidationRule for ThresholdOrderRule {
    fn validate(&self, settings: &NotificationSettings) -> Result<(), ValidationError> {
        let stricter_value = settings.thresholds.get(self.stricter);
        let looser_value = settings.thresholds.get(self.looser);

        if stricter_value < looser_value {
            Ok(())
        } else {
            Err(ValidationError::InvertedThresholds {
                stricter: self.stricter,
                stricter_value,
                looser: self.looser,
                looser_value,
            })
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 自定义校验规则
pub struct CustomRule<F>
where
    F: Fn(&NotificationSettings) -> Result<(), ValidationError> + Send + Sync,
{
    name: String,
    validator: F,
}

impl<F> CustomRule<F>
where
    F: Fn(&NotificationSettings) -> Result<(), ValidationError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, validator: F) -> Self {
        Self {
            name: name.into(),
            validator,
        }
    }
}

impl<F> ValidationRule for CustomRule<F>
where
    F: Fn(&NotificationSettings) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, settings: &NotificationSettings) -> Result<(), ValidationError> {
        (self.validator)(settings)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
