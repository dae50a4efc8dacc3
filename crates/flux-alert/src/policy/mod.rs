//! 调度策略
//!
//! 每个租户一份 [`PolicyState`]（限流窗口 + 批量窗口），由引擎保证单写者。
//! 每个周期根据租户配置构造 [`EffectivePolicy`]，配置非法时降级为立即发送。

pub mod batch;
pub mod quiet_hours;
pub mod rate_limit;

pub use batch::BatchWindows;
pub use quiet_hours::QuietWindow;
pub use rate_limit::SlidingWindowLimiter;

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::model::{Alert, Priority, SuppressReason};
use crate::settings::{FrequencyPolicy, NotificationSettings, ScheduleMode};

/// smart 模式下，近一小时非严重告警达到该数量后 medium 转为批量
pub const SMART_VOLUME_THRESHOLD: usize = 3;

/// 调度决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    DispatchNow,
    Schedule { at: DateTime<Utc> },
    Suppress {
        reason: SuppressReason,
        until: DateTime<Utc>,
    },
}

/// 本周期生效的策略
#[derive(Debug, Clone)]
pub struct EffectivePolicy {
    pub mode: ScheduleMode,
    pub quiet: Option<QuietWindow>,
    pub batch_interval_minutes: u32,
    pub max_per_hour: u32,
    /// 配置校验失败，已降级
    pub degraded: bool,
}

impl EffectivePolicy {
    pub fn from_settings(tenant_id: &str, settings: &NotificationSettings) -> Self {
        let frequency = &settings.frequency;

        if let Err(errors) = settings.validate() {
            warn!(
                tenant_id = %tenant_id,
                errors = %errors,
                "Invalid notification settings, quiet hours and batching disabled for this cycle"
            );
            let max_per_hour = if frequency.max_per_hour == 0 {
                FrequencyPolicy::default().max_per_hour
            } else {
                frequency.max_per_hour
            };
            return Self {
                mode: ScheduleMode::Immediate,
                quiet: None,
                batch_interval_minutes: 0,
                max_per_hour,
                degraded: true,
            };
        }

        let quiet = if frequency.quiet_hours_active() {
            QuietWindow::new(
                frequency.quiet_hours_start,
                frequency.quiet_hours_end,
                settings.local_offset(),
            )
        } else {
            None
        };

        Self {
            mode: frequency.mode,
            quiet,
            batch_interval_minutes: frequency.batch_interval_minutes,
            max_per_hour: frequency.max_per_hour,
            degraded: false,
        }
    }

    fn smart_interval(&self) -> u32 {
        (self.batch_interval_minutes / 2).max(1)
    }
}

/// 租户级调度状态
#[derive(Debug, Default)]
pub struct PolicyState {
    pub limiter: SlidingWindowLimiter,
    pub batches: BatchWindows,
    /// 已决定发送、结果尚未提交的告警
    in_flight: HashSet<String>,
}

impl PolicyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新告警（或升级重入）的决策
    pub fn decide_pending(
        &mut self,
        policy: &EffectivePolicy,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> Decision {
        if alert.priority.is_critical() {
            return Decision::DispatchNow;
        }

        if let Some(decision) = self.quiet_hours(policy, now) {
            return decision;
        }

        // 升级重发已经等过一个重复间隔，不再进入批量窗口
        if alert.escalation_level == 0 {
            if let Some(interval) = self.batch_interval(policy, alert.priority, now) {
                let at = self.batches.release_at(alert.category, now, interval);
                return Decision::Schedule { at };
            }
        }

        self.rate_cap(policy, now)
    }

    /// 到期的 scheduled / suppressed 告警的决策，不再批量
    pub fn decide_due(
        &mut self,
        policy: &EffectivePolicy,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> Decision {
        if alert.priority.is_critical() {
            return Decision::DispatchNow;
        }

        if let Some(decision) = self.quiet_hours(policy, now) {
            return decision;
        }

        self.rate_cap(policy, now)
    }

    /// 成功发送后计入限流窗口（严重告警不计）
    pub fn record_dispatch(&mut self, priority: Priority, at: DateTime<Utc>) {
        if !priority.is_critical() {
            self.limiter.record(at);
        }
    }

    /// 是否有一轮发送尚未提交
    pub fn is_in_flight(&self, alert_id: &str) -> bool {
        self.in_flight.contains(alert_id)
    }

    /// 决定发送：占用限流额度并标记为发送中
    pub fn begin_dispatch(&mut self, alert: &Alert, at: DateTime<Utc>) {
        self.in_flight.insert(alert.id.clone());
        self.record_dispatch(alert.priority, at);
    }

    /// 提交发送结果；未送达时归还占用的额度
    pub fn finish_dispatch(&mut self, alert: &Alert, at: DateTime<Utc>, delivered: bool) {
        self.in_flight.remove(&alert.id);
        if !delivered && !alert.priority.is_critical() {
            self.limiter.release(at);
        }
    }

    /// 清理过期的批量窗口
    pub fn housekeep(&mut self, now: DateTime<Utc>) {
        self.batches.close_expired(now);
    }

    fn quiet_hours(&self, policy: &EffectivePolicy, now: DateTime<Utc>) -> Option<Decision> {
        let window = policy.quiet.as_ref()?;
        if !window.contains(now) {
            return None;
        }
        let until = window.next_end(now);
        debug!(until = %until, "Inside quiet hours");
        Some(Decision::Suppress {
            reason: SuppressReason::QuietHours,
            until,
        })
    }

    /// 需要批量时返回批量间隔
    fn batch_interval(
        &mut self,
        policy: &EffectivePolicy,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Option<u32> {
        match policy.mode {
            ScheduleMode::Batched => Some(policy.batch_interval_minutes.max(1)),
            ScheduleMode::Smart => match priority {
                Priority::Critical | Priority::High => None,
                Priority::Medium => {
                    let recent = self.limiter.count(now);
                    (recent >= SMART_VOLUME_THRESHOLD).then(|| policy.smart_interval())
                }
                Priority::Low => Some(policy.smart_interval()),
            },
            ScheduleMode::Immediate | ScheduleMode::Quiet => None,
        }
    }

    fn rate_cap(&mut self, policy: &EffectivePolicy, now: DateTime<Utc>) -> Decision {
        if self.limiter.is_capped(now, policy.max_per_hour) {
            Decision::Suppress {
                reason: SuppressReason::RateCapped,
                until: self.limiter.next_free(now),
            }
        } else {
            Decision::DispatchNow
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlertCategory;
    use chrono::{Duration, NaiveTime, TimeZone};

    fn alert(priority: Priority, category: AlertCategory) -> Alert {
        Alert::new("t1", category, priority, "dev-1", "test", Utc::now())
    }

    fn settings(mode: ScheduleMode) -> NotificationSettings {
        let mut settings = NotificationSettings::default();
        settings.frequency.mode = mode;
        settings
    }

    fn night() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 0).unwrap()
    }

    #[test]
    fn test_critical_bypasses_quiet_hours_and_cap() {
        let mut s = settings(ScheduleMode::Quiet);
        s.frequency.max_per_hour = 1;
        let policy = EffectivePolicy::from_settings("t1", &s);
        let mut state = PolicyState::new();
        let now = night();

        state.record_dispatch(Priority::Low, now - Duration::minutes(5));

        let critical = alert(Priority::Critical, AlertCategory::CriticalFailures);
        assert_eq!(state.decide_pending(&policy, &critical, now), Decision::DispatchNow);
        assert_eq!(state.decide_due(&policy, &critical, now), Decision::DispatchNow);

        let medium = alert(Priority::Medium, AlertCategory::MediumWarnings);
        assert!(matches!(
            state.decide_pending(&policy, &medium, now),
            Decision::Suppress { reason: SuppressReason::QuietHours, .. }
        ));
    }

    #[test]
    fn test_quiet_mode_suppresses_until_window_end() {
        let policy = EffectivePolicy::from_settings("t1", &settings(ScheduleMode::Quiet));
        let mut state = PolicyState::new();

        let decision = state.decide_pending(&policy, &alert(Priority::High, AlertCategory::HighPriorityWarnings), night());
        assert_eq!(
            decision,
            Decision::Suppress {
                reason: SuppressReason::QuietHours,
                until: Utc.with_ymd_and_hms(2024, 5, 2, 7, 0, 0).unwrap(),
            }
        );

        // 白天与 immediate 相同
        let day = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let decision = state.decide_pending(&policy, &alert(Priority::Low, AlertCategory::LowPriorityInfo), day);
        assert_eq!(decision, Decision::DispatchNow);
    }

    #[test]
    fn test_rate_cap_boundary() {
        let mut s = settings(ScheduleMode::Immediate);
        s.frequency.max_per_hour = 3;
        let policy = EffectivePolicy::from_settings("t1", &s);
        let mut state = PolicyState::new();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let medium = alert(Priority::Medium, AlertCategory::MediumWarnings);

        for i in 0..3 {
            let now = t0 + Duration::minutes(i);
            assert_eq!(state.decide_pending(&policy, &medium, now), Decision::DispatchNow);
            state.record_dispatch(Priority::Medium, now);
        }

        let now = t0 + Duration::minutes(5);
        assert_eq!(
            state.decide_pending(&policy, &medium, now),
            Decision::Suppress {
                reason: SuppressReason::RateCapped,
                until: t0 + Duration::hours(1),
            }
        );

        let critical = alert(Priority::Critical, AlertCategory::CriticalFailures);
        assert_eq!(state.decide_pending(&policy, &critical, now), Decision::DispatchNow);
        state.record_dispatch(Priority::Critical, now);
        assert_eq!(state.limiter.count(now), 3);
    }

    #[test]
    fn test_batched_mode_shares_release_time() {
        let mut s = settings(ScheduleMode::Batched);
        s.frequency.batch_interval_minutes = 20;
        let policy = EffectivePolicy::from_settings("t1", &s);
        let mut state = PolicyState::new();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        let a = alert(Priority::High, AlertCategory::Inventory);
        let b = alert(Priority::Low, AlertCategory::Inventory);
        let first = state.decide_pending(&policy, &a, t0);
        let second = state.decide_pending(&policy, &b, t0 + Duration::minutes(3));

        assert_eq!(first, Decision::Schedule { at: t0 + Duration::minutes(20) });
        assert_eq!(first, second);

        // 到期释放时不再批量
        assert_eq!(state.decide_due(&policy, &a, t0 + Duration::minutes(20)), Decision::DispatchNow);
    }

    #[test]
    fn test_smart_mode_heuristic() {
        let mut s = settings(ScheduleMode::Smart);
        s.frequency.batch_interval_minutes = 30;
        let policy = EffectivePolicy::from_settings("t1", &s);
        let mut state = PolicyState::new();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        let high = alert(Priority::High, AlertCategory::HighPriorityWarnings);
        let medium = alert(Priority::Medium, AlertCategory::MediumWarnings);
        let low = alert(Priority::Low, AlertCategory::LowPriorityInfo);

        assert_eq!(state.decide_pending(&policy, &high, t0), Decision::DispatchNow);
        assert_eq!(state.decide_pending(&policy, &medium, t0), Decision::DispatchNow);
        assert_eq!(
            state.decide_pending(&policy, &low, t0),
            Decision::Schedule { at: t0 + Duration::minutes(15) }
        );

        for i in 0..SMART_VOLUME_THRESHOLD as i64 {
            state.record_dispatch(Priority::Medium, t0 - Duration::minutes(i + 1));
        }
        assert_eq!(
            state.decide_pending(&policy, &medium, t0),
            Decision::Schedule { at: t0 + Duration::minutes(15) }
        );
        assert_eq!(state.decide_pending(&policy, &high, t0), Decision::DispatchNow);
    }

    #[test]
    fn test_escalated_alert_skips_batching() {
        let policy = EffectivePolicy::from_settings("t1", &settings(ScheduleMode::Batched));
        let mut state = PolicyState::new();
        let mut escalated = alert(Priority::Low, AlertCategory::LowPriorityInfo);
        escalated.reopen();

        assert_eq!(state.decide_pending(&policy, &escalated, Utc::now()), Decision::DispatchNow);
    }

    #[test]
    fn test_invalid_settings_degrade_to_immediate() {
        let mut s = settings(ScheduleMode::Batched);
        s.frequency.quiet_hours_enabled = true;
        s.frequency.quiet_hours_start = NaiveTime::from_hms_opt(22, 0, 0).unwrap();
        s.frequency.quiet_hours_end = NaiveTime::from_hms_opt(22, 0, 0).unwrap();

        let policy = EffectivePolicy::from_settings("t1", &s);
        assert!(policy.degraded);
        assert!(policy.quiet.is_none());

        let mut state = PolicyState::new();
        let decision = state.decide_pending(&policy, &alert(Priority::Low, AlertCategory::LowPriorityInfo), night());
        assert_eq!(decision, Decision::DispatchNow);
    }

    #[test]
    fn test_failed_round_returns_rate_slot() {
        let mut s = settings(ScheduleMode::Immediate);
        s.frequency.max_per_hour = 1;
        let policy = EffectivePolicy::from_settings("t1", &s);
        let mut state = PolicyState::new();
        let now = night() - Duration::hours(10);

        let first = alert(Priority::Low, AlertCategory::LowPriorityInfo);
        assert_eq!(state.decide_pending(&policy, &first, now), Decision::DispatchNow);
        state.begin_dispatch(&first, now);
        assert!(state.is_in_flight(&first.id));

        // 额度在发送期间已被占用
        let second = alert(Priority::Low, AlertCategory::LowPriorityInfo);
        assert!(matches!(
            state.decide_pending(&policy, &second, now),
            Decision::Suppress { reason: SuppressReason::RateCapped, .. }
        ));

        state.finish_dispatch(&first, now, false);
        assert!(!state.is_in_flight(&first.id));
        assert_eq!(state.decide_pending(&policy, &second, now), Decision::DispatchNow);
    }
}
