use chrono::{DateTime, Utc};
use flux_alert::NotificationSettings;
use serde::{Deserialize, Serialize};

/// 配置分区，用于标记两个版本之间改动了哪些部分
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsSection {
    Thresholds,
    AlertTypes,
    Channels,
    Frequency,
    Priorities,
    UtcOffset,
}

impl SettingsSection {
    /// `new` 相对 `old` 改动的分区
    pub fn diff(old: &NotificationSettings, new: &NotificationSettings) -> Vec<SettingsSection> {
        let mut changed = Vec::new();
        if old.thresholds != new.thresholds {
            changed.push(SettingsSection::Thresholds);
        }
        if old.alert_types != new.alert_types {
            changed.push(SettingsSection::AlertTypes);
        }
        if old.channels != new.channels {
            changed.push(SettingsSection::Channels);
        }
        if old.frequency != new.frequency {
            changed.push(SettingsSection::Frequency);
        }
        if old.priorities != new.priorities {
            changed.push(SettingsSection::Priorities);
        }
        if old.utc_offset_minutes != new.utc_offset_minutes {
            changed.push(SettingsSection::UtcOffset);
        }
        changed
    }
}

/// 租户配置的一个历史版本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsVersion {
    pub version: u64,
    pub settings: NotificationSettings,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub comment: String,
    /// 相对上一版本（首个版本相对默认配置）改动的分区
    pub changed: Vec<SettingsSection>,
}

/// 单个租户的配置版本历史
///
/// 只保留最近 `max_versions` 个版本，版本号单调递增，淘汰后不复用。
#[derive(Debug, Clone)]
pub struct VersionHistory {
    versions: Vec<SettingsVersion>,
    max_versions: usize,
    next_version: u64,
}

impl VersionHistory {
    pub fn new(max_versions: usize) -> Self {
        Self {
            versions: Vec::new(),
            max_versions: max_versions.max(1),
            next_version: 1,
        }
    }

    /// 记录新版本，返回版本号
    pub fn record(
        &mut self,
        settings: NotificationSettings,
        author: impl Into<String>,
        comment: impl Into<String>,
    ) -> u64 {
        let changed = match self.versions.last() {
            Some(previous) => SettingsSection::diff(&previous.settings, &settings),
            None => SettingsSection::diff(&NotificationSettings::default(), &settings),
        };

        let version = self.next_version;
        self.versions.push(SettingsVersion {
            version,
            settings,
            timestamp: Utc::now(),
            author: author.into(),
            comment: comment.into(),
            changed,
        });
        self.next_version += 1;

        if self.versions.len() > self.max_versions {
            self.versions.remove(0);
        }
        version
    }

    pub fn get(&self, version: u64) -> Option<&SettingsVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// 保留的版本（旧到新）
    pub fn list(&self) -> &[SettingsVersion] {
        &self.versions
    }

    pub fn latest(&self) -> Option<&SettingsVersion> {
        self.versions.last()
    }

    /// 改动过某个分区的版本
    pub fn touching(&self, section: SettingsSection) -> Vec<&SettingsVersion> {
        self.versions
            .iter()
            .filter(|v| v.changed.contains(&section))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_alert::{AlertCategory, ScheduleMode};

    #[test]
    fn test_history_is_bounded() {
        let mut history = VersionHistory::new(3);

        for i in 1..=3 {
            let mut settings = NotificationSettings::default();
            settings.thresholds.battery_low = 20.0 + i as f64;
            assert_eq!(history.record(settings, format!("user{}", i), "edit"), i);
        }
        assert_eq!(history.list().len(), 3);
        assert_eq!(history.latest().unwrap().author, "user3");

        assert_eq!(history.record(NotificationSettings::default(), "user4", "reset"), 4);
        assert_eq!(history.list().len(), 3);
        assert!(history.get(1).is_none());
        assert_eq!(history.get(2).unwrap().author, "user2");
    }

    #[test]
    fn test_changed_sections() {
        let mut history = VersionHistory::new(10);

        let mut first = NotificationSettings::default();
        first.thresholds.battery_low = 30.0;
        history.record(first.clone(), "alice", "battery");
        assert_eq!(history.latest().unwrap().changed, vec![SettingsSection::Thresholds]);

        let mut second = first.clone();
        second.frequency.mode = ScheduleMode::Quiet;
        second.alert_types.insert(AlertCategory::Inventory, false);
        history.record(second.clone(), "bob", "quiet nights");
        assert_eq!(
            history.latest().unwrap().changed,
            vec![SettingsSection::AlertTypes, SettingsSection::Frequency]
        );

        // 热加载内容不变时没有改动分区
        history.record(second, "system", "Hot reload");
        assert!(history.latest().unwrap().changed.is_empty());

        let touching: Vec<u64> = history
            .touching(SettingsSection::Frequency)
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(touching, vec![2]);
    }
}
