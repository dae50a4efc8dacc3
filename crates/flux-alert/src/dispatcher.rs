use chrono::{DateTime, Utc};
use flux_notify::{NotifyChannel, NotifyManager, NotifyMessage, Recipient};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::model::{Alert, DispatchOutcome, DispatchRecord};
use crate::settings::NotificationSettings;

/// 确认后仍在进行的发送记为失败时使用的原因
pub const CANCELLED_BY_ACK: &str = "cancelled by acknowledgment";

/// 一轮发送的结果
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub records: Vec<DispatchRecord>,
    /// 发送过程中收到确认
    pub cancelled: bool,
}

impl DispatchReport {
    /// 至少一个渠道送达
    pub fn any_sent(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.outcome == DispatchOutcome::Sent)
    }

    pub fn count(&self, outcome: DispatchOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }
}

/// 渲染通知消息
pub fn render(alert: &Alert) -> NotifyMessage {
    let mut title = format!("{}: {}", alert.category.label(), alert.device_id);
    if alert.escalation_level > 0 {
        title = format!("Reminder #{} - {}", alert.escalation_level, title);
    }

    let mut content = alert.message.clone();
    if alert.occurrences > 1 {
        content.push_str(&format!(" ({} occurrences)", alert.occurrences));
    }

    NotifyMessage::new(title, content, alert.priority.notify_level()).with_metadata(
        serde_json::json!({
            "alert_id": alert.id,
            "tenant_id": alert.tenant_id,
            "device_id": alert.device_id,
            "category": alert.category,
            "priority": alert.priority,
            "occurrences": alert.occurrences,
            "escalation_level": alert.escalation_level,
        }),
    )
}

/// 确认信号：发送方关闭视为永不取消
async fn acknowledged(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|acked| *acked).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// 分发器
///
/// 每个启用的渠道并行发送，互不阻塞；关闭的渠道只留审计记录。
#[derive(Clone)]
pub struct Dispatcher {
    notify: Arc<NotifyManager>,
}

impl Dispatcher {
    pub fn new(notify: Arc<NotifyManager>) -> Self {
        Self { notify }
    }

    pub fn notify_manager(&self) -> &Arc<NotifyManager> {
        &self.notify
    }

    /// 发送一轮通知，每个渠道一条记录
    pub async fn dispatch(
        &self,
        alert: &Alert,
        settings: &NotificationSettings,
        recipient: &Recipient,
        cancel: watch::Receiver<bool>,
        now: DateTime<Utc>,
    ) -> DispatchReport {
        let message = render(alert).with_timestamp(now);
        let mut records = Vec::with_capacity(NotifyChannel::ALL.len());
        let mut sends = Vec::new();

        for channel in NotifyChannel::ALL {
            if !settings.is_channel_enabled(channel) {
                records.push(DispatchRecord::skipped(&alert.id, channel, now));
                continue;
            }

            let mut cancel = cancel.clone();
            let message = &message;
            let alert_id = alert.id.as_str();
            sends.push(async move {
                tokio::select! {
                    result = self.notify.send(channel, recipient, message) => match result {
                        Ok(()) => DispatchRecord::sent(alert_id, channel, now),
                        Err(e) => DispatchRecord::failed(alert_id, channel, now, e.to_string()),
                    },
                    _ = acknowledged(&mut cancel) => {
                        DispatchRecord::failed(alert_id, channel, now, CANCELLED_BY_ACK)
                    }
                }
            });
        }

        records.extend(join_all(sends).await);
        records.sort_by_key(|r| r.channel);

        let cancelled = records
            .iter()
            .any(|r| r.error.as_deref() == Some(CANCELLED_BY_ACK));
        if cancelled {
            debug!(alert_id = %alert.id, "Dispatch interrupted by acknowledgment");
        }

        let report = DispatchReport { records, cancelled };
        if !report.any_sent() && !report.cancelled {
            warn!(
                alert_id = %alert.id,
                tenant_id = %alert.tenant_id,
                failed = report.count(DispatchOutcome::Failed),
                "No channel delivered the alert"
            );
        }
        report
    }
}
