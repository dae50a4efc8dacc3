use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::model::{AlertState, AuditEvent};
use crate::settings::NotificationSettings;
use crate::store::AlertStore;

/// 一次巡检的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// 重新进入 pending 的告警
    pub requeued: Vec<String>,
    /// 达到最大发送次数而过期的告警
    pub expired: Vec<String>,
}

impl SweepOutcome {
    pub fn merge(&mut self, other: SweepOutcome) {
        self.requeued.extend(other.requeued);
        self.expired.extend(other.expired);
    }

    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.expired.is_empty()
    }
}

enum Step {
    Requeued,
    Expired(AuditEvent),
}

/// 升级巡检
///
/// 已发送未确认的告警超过重复间隔后重新进入调度；
/// 发送次数达到上限的告警转为 `expired` 并写入审计。
#[derive(Debug, Clone)]
pub struct EscalationMonitor {
    max_dispatch_count: u32,
}

impl EscalationMonitor {
    pub fn new(max_dispatch_count: u32) -> Self {
        Self {
            max_dispatch_count: max_dispatch_count.max(1),
        }
    }

    pub fn max_dispatch_count(&self) -> u32 {
        self.max_dispatch_count
    }

    /// 巡检一个租户
    pub async fn sweep(
        &self,
        store: &AlertStore,
        tenant_id: &str,
        settings: &NotificationSettings,
        now: DateTime<Utc>,
    ) -> SweepOutcome {
        let repeat = Duration::minutes(settings.frequency.repeat_interval_minutes.max(1) as i64);
        let mut outcome = SweepOutcome::default();

        for alert in store.dispatched(tenant_id).await {
            let Some(last) = alert.last_dispatched_at else {
                continue;
            };
            if now - last < repeat {
                continue;
            }

            let max = self.max_dispatch_count;
            let step = store
                .update(&alert.id, |a| {
                    // 读取后可能已被确认
                    if a.state != AlertState::Dispatched {
                        return None;
                    }
                    if a.dispatch_count >= max {
                        a.expire(now);
                        Some(Step::Expired(AuditEvent::UnacknowledgedExpired {
                            alert_id: a.id.clone(),
                            tenant_id: a.tenant_id.clone(),
                            dispatch_count: a.dispatch_count,
                            delivery_attempts: a.delivery_attempts,
                            at: now,
                        }))
                    } else {
                        a.reopen();
                        Some(Step::Requeued)
                    }
                })
                .await
                .flatten();

            match step {
                Some(Step::Requeued) => {
                    info!(
                        tenant_id = %tenant_id,
                        alert_id = %alert.id,
                        escalation_level = alert.escalation_level + 1,
                        "Unacknowledged alert escalated"
                    );
                    outcome.requeued.push(alert.id);
                }
                Some(Step::Expired(event)) => {
                    warn!(
                        tenant_id = %tenant_id,
                        alert_id = %alert.id,
                        dispatch_count = alert.dispatch_count,
                        "Alert expired without acknowledgment"
                    );
                    store.append_audit([event]).await;
                    outcome.expired.push(alert.id);
                }
                None => {}
            }
        }

        outcome
    }
}
