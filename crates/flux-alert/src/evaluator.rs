use crate::error::Result;
use crate::model::{AlertCandidate, MetricKind, MetricSample, ThresholdKey};
use crate::settings::NotificationSettings;

/// 比较方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// 水位类指标：低于阈值即越界
    LessThan,
    /// 突增类指标：达到阈值即越界
    GreaterOrEqual,
}

impl Comparison {
    pub fn crossed(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::LessThan => value < threshold,
            Comparison::GreaterOrEqual => value >= threshold,
        }
    }
}

/// 指标对应的阈值梯度，最严格的在前
pub fn threshold_ladder(kind: MetricKind) -> (&'static [ThresholdKey], Comparison) {
    match kind {
        MetricKind::Battery => (
            &[ThresholdKey::BatteryVeryLow, ThresholdKey::BatteryLow],
            Comparison::LessThan,
        ),
        MetricKind::Signal => (
            &[ThresholdKey::SignalVeryWeak, ThresholdKey::SignalWeak],
            Comparison::LessThan,
        ),
        MetricKind::DeviceHealth => (
            &[ThresholdKey::DeviceHealthCritical, ThresholdKey::DeviceHealthWarning],
            Comparison::LessThan,
        ),
        MetricKind::Inventory => (&[ThresholdKey::InventoryLow], Comparison::LessThan),
        MetricKind::EnergyDelta => (&[ThresholdKey::EnergySpike], Comparison::GreaterOrEqual),
    }
}

/// 参与比较的值
///
/// 能耗样本带基线时换算为相对基线的增幅百分比，否则视为已计算好的增幅。
fn comparable_value(sample: &MetricSample) -> f64 {
    match (sample.metric_kind, sample.baseline) {
        (MetricKind::EnergyDelta, Some(baseline)) => (sample.value - baseline) / baseline * 100.0,
        _ => sample.value,
    }
}

/// 阈值评估
///
/// 纯函数：只依赖当前样本和配置。格式错误的样本返回错误，调用方跳过即可。
pub fn evaluate(
    sample: &MetricSample,
    settings: &NotificationSettings,
) -> Result<Option<AlertCandidate>> {
    sample.validate()?;

    let value = comparable_value(sample);
    let (ladder, comparison) = threshold_ladder(sample.metric_kind);

    let crossed = ladder.iter().find_map(|key| {
        let threshold = settings.thresholds.get(*key);
        comparison
            .crossed(value, threshold)
            .then_some((*key, threshold))
    });

    Ok(crossed.map(|(key, threshold)| AlertCandidate {
        device_id: sample.device_id.clone(),
        metric_kind: sample.metric_kind,
        value,
        threshold_key_crossed: key,
        threshold,
        timestamp: sample.timestamp,
    }))
}
