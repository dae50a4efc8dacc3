use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::model::AlertCategory;

/// 按类别的批量窗口
///
/// 窗口内到达的同类告警共用一个释放时间，到点一起发出。
#[derive(Debug, Clone, Default)]
pub struct BatchWindows {
    release_at: HashMap<AlertCategory, DateTime<Utc>>,
}

impl BatchWindows {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回类别当前窗口的释放时间，没有打开的窗口则新开一个
    pub fn release_at(
        &mut self,
        category: AlertCategory,
        now: DateTime<Utc>,
        interval_minutes: u32,
    ) -> DateTime<Utc> {
        if let Some(release) = self.release_at.get(&category) {
            if *release > now {
                return *release;
            }
        }

        let release = now + Duration::minutes(interval_minutes.max(1) as i64);
        debug!(category = ?category, release_at = %release, "Batch window opened");
        self.release_at.insert(category, release);
        release
    }

    /// 清理已到期的窗口
    pub fn close_expired(&mut self, now: DateTime<Utc>) {
        self.release_at.retain(|_, release| *release > now);
    }

    pub fn open_count(&self) -> usize {
        self.release_at.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alerts_in_window_share_release_time() {
        let mut batches = BatchWindows::new();
        let t0 = Utc::now();

        let first = batches.release_at(AlertCategory::MediumWarnings, t0, 15);
        let second = batches.release_at(AlertCategory::MediumWarnings, t0 + Duration::minutes(7), 15);
        assert_eq!(first, t0 + Duration::minutes(15));
        assert_eq!(first, second);

        // 不同类别独立
        let other = batches.release_at(AlertCategory::Inventory, t0 + Duration::minutes(7), 15);
        assert_eq!(other, t0 + Duration::minutes(22));

        // 窗口到期后开新窗口
        let next = batches.release_at(AlertCategory::MediumWarnings, first, 15);
        assert_eq!(next, first + Duration::minutes(15));
    }

    #[test]
    fn test_close_expired() {
        let mut batches = BatchWindows::new();
        let t0 = Utc::now();
        batches.release_at(AlertCategory::Energy, t0, 5);
        batches.release_at(AlertCategory::Inventory, t0, 30);

        batches.close_expired(t0 + Duration::minutes(10));
        assert_eq!(batches.open_count(), 1);
    }
}
