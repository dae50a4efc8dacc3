use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Alert, AlertCandidate, AlertCategory, MetricKind, Priority, ThresholdKey};
use crate::settings::NotificationSettings;

/// 外部直接上报的告警（例如安全检测），跳过阈值评估
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalAlert {
    pub device_id: String,
    pub category: AlertCategory,
    pub priority: Priority,
    pub message: String,
}

/// 阈值与优先级决定类别
///
/// 电量类越界属于可预期的损耗，非严重时归入预测性维护；
/// 信号与健康度按优先级落入对应的告警级别。
pub fn category_for(key: ThresholdKey, priority: Priority) -> AlertCategory {
    match key.metric_kind() {
        MetricKind::Battery if priority.is_critical() => AlertCategory::CriticalFailures,
        MetricKind::Battery => AlertCategory::PredictiveMaintenance,
        MetricKind::Signal | MetricKind::DeviceHealth => match priority {
            Priority::Critical => AlertCategory::CriticalFailures,
            Priority::High => AlertCategory::HighPriorityWarnings,
            Priority::Medium => AlertCategory::MediumWarnings,
            Priority::Low => AlertCategory::LowPriorityInfo,
        },
        MetricKind::Inventory => AlertCategory::Inventory,
        MetricKind::EnergyDelta => AlertCategory::Energy,
    }
}

fn render_message(candidate: &AlertCandidate) -> String {
    let device = &candidate.device_id;
    let key = candidate.threshold_key_crossed;
    match candidate.metric_kind {
        MetricKind::Battery => format!(
            "Battery at {:.1}% on device {} ({} < {:.1}%)",
            candidate.value, device, key, candidate.threshold
        ),
        MetricKind::Signal => format!(
            "Signal strength at {:.1}% on device {} ({} < {:.1}%)",
            candidate.value, device, key, candidate.threshold
        ),
        MetricKind::DeviceHealth => format!(
            "Device health at {:.1}% on device {} ({} < {:.1}%)",
            candidate.value, device, key, candidate.threshold
        ),
        MetricKind::Inventory => format!(
            "Inventory at {:.1}% at {} ({} < {:.1}%)",
            candidate.value, device, key, candidate.threshold
        ),
        MetricKind::EnergyDelta => format!(
            "Energy consumption up {:.1}% over baseline on {} ({} >= {:.1}%)",
            candidate.value, device, key, candidate.threshold
        ),
    }
}

/// 告警分类
///
/// 类别被关闭时直接丢弃，不生成任何告警，也不会出现在历史中。
pub fn classify(
    tenant_id: &str,
    candidate: &AlertCandidate,
    settings: &NotificationSettings,
) -> Option<Alert> {
    let key = candidate.threshold_key_crossed;
    let priority = settings.priority_for(key);
    let category = category_for(key, priority);

    if !settings.is_category_enabled(category) {
        debug!(
            tenant_id = %tenant_id,
            device_id = %candidate.device_id,
            category = ?category,
            "Category disabled, candidate dropped"
        );
        return None;
    }

    Some(
        Alert::new(
            tenant_id,
            category,
            priority,
            &candidate.device_id,
            render_message(candidate),
            candidate.timestamp,
        )
        .with_kind(key),
    )
}

/// 外部告警同样经过类别开关
pub fn classify_external(
    tenant_id: &str,
    event: &ExternalAlert,
    settings: &NotificationSettings,
    now: chrono::DateTime<chrono::Utc>,
) -> Option<Alert> {
    if !settings.is_category_enabled(event.category) {
        debug!(tenant_id = %tenant_id, category = ?event.category, "Category disabled, external alert dropped");
        return None;
    }

    Some(Alert::new(
        tenant_id,
        event.category,
        event.priority,
        &event.device_id,
        &event.message,
        now,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::evaluate;
    use crate::model::{AlertState, MetricSample};
    use chrono::Utc;

    fn candidate(key: ThresholdKey, value: f64) -> AlertCandidate {
        AlertCandidate {
            device_id: "dev-1".to_string(),
            metric_kind: key.metric_kind(),
            value,
            threshold_key_crossed: key,
            threshold: 10.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_battery_very_low_is_critical_failure() {
        let settings = NotificationSettings::default();
        let alert = classify("t1", &candidate(ThresholdKey::BatteryVeryLow, 8.0), &settings).unwrap();

        assert_eq!(alert.priority, Priority::Critical);
        assert_eq!(alert.category, AlertCategory::CriticalFailures);
        assert_eq!(alert.state, AlertState::Pending);
        assert_eq!(alert.kind, Some(ThresholdKey::BatteryVeryLow));
        assert!(alert.message.contains("dev-1"));
    }

    #[test]
    fn test_battery_downgraded_goes_to_predictive_maintenance() {
        let mut settings = NotificationSettings::default();
        settings.priorities.insert(ThresholdKey::BatteryVeryLow, Priority::High);

        let alert = classify("t1", &candidate(ThresholdKey::BatteryVeryLow, 8.0), &settings).unwrap();
        assert_eq!(alert.priority, Priority::High);
        assert_eq!(alert.category, AlertCategory::PredictiveMaintenance);
    }

    #[test]
    fn test_missing_priority_falls_back_to_default_table() {
        let mut settings = NotificationSettings::default();
        settings.priorities.clear();

        let alert = classify("t1", &candidate(ThresholdKey::SignalVeryWeak, 5.0), &settings).unwrap();
        assert_eq!(alert.priority, Priority::High);
        assert_eq!(alert.category, AlertCategory::HighPriorityWarnings);
    }

    #[test]
    fn test_disabled_category_never_produces_alert() {
        let mut settings = NotificationSettings::default();
        settings.alert_types.insert(AlertCategory::CriticalFailures, false);

        for value in [0.0, 1.0, 5.0, 9.9] {
            let sample = MetricSample::new("dev-1", MetricKind::Battery, value);
            let candidate = evaluate(&sample, &settings).unwrap().unwrap();
            assert!(classify("t1", &candidate, &settings).is_none());
        }

        // health critical 同样落在被关闭的类别
        let sample = MetricSample::new("dev-1", MetricKind::DeviceHealth, 5.0);
        let candidate = evaluate(&sample, &settings).unwrap().unwrap();
        assert!(classify("t1", &candidate, &settings).is_none());
    }

    #[test]
    fn test_inventory_and_energy_categories() {
        let settings = NotificationSettings::default();
        let inventory = classify("t1", &candidate(ThresholdKey::InventoryLow, 5.0), &settings).unwrap();
        assert_eq!(inventory.category, AlertCategory::Inventory);

        let energy = classify("t1", &candidate(ThresholdKey::EnergySpike, 40.0), &settings).unwrap();
        assert_eq!(energy.category, AlertCategory::Energy);
        assert!(energy.message.contains("over baseline"));
    }

    #[test]
    fn test_external_alert_respects_gate() {
        let mut settings = NotificationSettings::default();
        let event = ExternalAlert {
            device_id: "gate-3".to_string(),
            category: AlertCategory::Security,
            priority: Priority::High,
            message: "Tamper detected".to_string(),
        };

        assert!(classify_external("t1", &event, &settings, Utc::now()).is_some());

        settings.alert_types.insert(AlertCategory::Security, false);
        assert!(classify_external("t1", &event, &settings, Utc::now()).is_none());
    }
}
