use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flux_notify::{NotifyManager, Recipient};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::classifier::{classify, classify_external, ExternalAlert};
use crate::dispatcher::Dispatcher;
use crate::error::{AlertError, Result};
use crate::escalation::{EscalationMonitor, SweepOutcome};
use crate::evaluator::evaluate;
use crate::model::{Alert, AlertState, AuditEvent, DispatchRecord, MetricSample};
use crate::policy::{Decision, EffectivePolicy, PolicyState};
use crate::settings::{NotificationSettings, SettingsProvider};
use crate::store::AlertStore;

/// 默认最大发送轮次
pub const DEFAULT_MAX_DISPATCH_COUNT: u32 = 5;

/// 终态告警默认保留时长（小时）
pub const DEFAULT_HISTORY_RETENTION_HOURS: u64 = 168;

/// 终态告警默认保留条数
pub const DEFAULT_MAX_HISTORY: usize = 10_000;

/// 保留时长上限，约一百年
const MAX_RETENTION_HOURS: u64 = 24 * 365 * 100;

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 成功发送轮次上限，同时约束全部失败的重试轮次
    pub max_dispatch_count: u32,
    /// 已确认/已过期告警的保留时长
    pub history_retention_hours: u64,
    /// 已确认/已过期告警的保留条数
    pub max_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_dispatch_count: DEFAULT_MAX_DISPATCH_COUNT,
            history_retention_hours: DEFAULT_HISTORY_RETENTION_HOURS,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

/// 一轮发送提交后的结果
enum Commit {
    Dispatched,
    Retry,
    Expired(AuditEvent),
    /// 已被确认，发送结果不再改变状态
    Superseded,
}

/// 告警引擎
///
/// 样本评估无共享状态；调度状态按租户加锁，同一租户单写者，不同租户互不竞争。
pub struct AlertEngine {
    settings: Arc<dyn SettingsProvider>,
    store: AlertStore,
    dispatcher: Dispatcher,
    escalation: EscalationMonitor,
    tenants: DashMap<String, Arc<Mutex<PolicyState>>>,
    recipients: DashMap<String, Recipient>,
    /// 发送中的告警的确认信号
    cancellations: DashMap<String, watch::Sender<bool>>,
    config: EngineConfig,
}

impl AlertEngine {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        notify: Arc<NotifyManager>,
        config: EngineConfig,
    ) -> Self {
        info!(
            max_dispatch_count = config.max_dispatch_count,
            history_retention_hours = config.history_retention_hours,
            max_history = config.max_history,
            "Alert engine created"
        );
        Self {
            settings,
            store: AlertStore::new(),
            dispatcher: Dispatcher::new(notify),
            escalation: EscalationMonitor::new(config.max_dispatch_count),
            tenants: DashMap::new(),
            recipients: DashMap::new(),
            cancellations: DashMap::new(),
            config,
        }
    }

    pub fn store(&self) -> &AlertStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 登记租户的联系方式
    pub fn register_recipient(&self, tenant_id: impl Into<String>, recipient: Recipient) {
        let tenant_id = tenant_id.into();
        debug!(tenant_id = %tenant_id, recipient = %recipient.id, "Recipient registered");
        self.recipients.insert(tenant_id, recipient);
    }

    /// 租户联系方式，未登记时只有 ID（仅站内消息可达）
    pub fn recipient(&self, tenant_id: &str) -> Recipient {
        self.recipients
            .get(tenant_id)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| Recipient::new(tenant_id))
    }

    fn tenant_state(&self, tenant_id: &str) -> Arc<Mutex<PolicyState>> {
        self.tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PolicyState::new())))
            .clone()
    }

    async fn load_settings(&self, tenant_id: &str) -> Result<NotificationSettings> {
        self.settings.get_settings(tenant_id).await
    }

    /// 接收一个指标样本
    pub async fn ingest(&self, tenant_id: &str, sample: MetricSample) -> Result<Option<Alert>> {
        self.ingest_at(tenant_id, sample, Utc::now()).await
    }

    /// 接收一个指标样本（指定处理时间）
    ///
    /// 样本格式错误只影响该样本；类别关闭时不产生告警。
    pub async fn ingest_at(
        &self,
        tenant_id: &str,
        sample: MetricSample,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let settings = self.load_settings(tenant_id).await?;

        let candidate = match evaluate(&sample, &settings) {
            Ok(Some(candidate)) => candidate,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(tenant_id = %tenant_id, device_id = %sample.device_id, error = %e, "Skipping malformed sample");
                return Err(e);
            }
        };

        let Some(alert) = classify(tenant_id, &candidate, &settings) else {
            return Ok(None);
        };

        self.admit(tenant_id, alert, &settings, now).await.map(Some)
    }

    /// 接收外部直接上报的告警
    pub async fn raise(&self, tenant_id: &str, event: ExternalAlert) -> Result<Option<Alert>> {
        self.raise_at(tenant_id, event, Utc::now()).await
    }

    pub async fn raise_at(
        &self,
        tenant_id: &str,
        event: ExternalAlert,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        if event.device_id.trim().is_empty() {
            return Err(AlertError::invalid_sample("device_id is empty"));
        }
        let settings = self.load_settings(tenant_id).await?;

        let Some(alert) = classify_external(tenant_id, &event, &settings, now) else {
            return Ok(None);
        };

        self.admit(tenant_id, alert, &settings, now).await.map(Some)
    }

    /// 合并或新建告警，然后立即走一遍调度
    async fn admit(
        &self,
        tenant_id: &str,
        alert: Alert,
        settings: &NotificationSettings,
        now: DateTime<Utc>,
    ) -> Result<Alert> {
        let id = {
            let state = self.tenant_state(tenant_id);
            let _guard = state.lock().await;

            match self
                .store
                .find_open(tenant_id, &alert.device_id, alert.category)
                .await
            {
                Some(existing) => {
                    let priority = alert.priority;
                    let message = alert.message;
                    let raised = self
                        .store
                        .update(&existing, |a| {
                            let raised = priority.is_critical() && !a.priority.is_critical();
                            a.merge_occurrence(priority, message);
                            // 严重的合并告警不再等待批量或免打扰，刚升为严重的已发告警重新发送
                            if raised
                                || (priority.is_critical() && a.state != AlertState::Dispatched)
                            {
                                a.expedite(now);
                            }
                            raised
                        })
                        .await
                        .unwrap_or(false);
                    if raised {
                        info!(tenant_id = %tenant_id, alert_id = %existing, "Merged alert raised to critical");
                    } else {
                        debug!(tenant_id = %tenant_id, alert_id = %existing, "Candidate merged into open alert");
                    }
                    existing
                }
                None => {
                    info!(
                        tenant_id = %tenant_id,
                        alert_id = %alert.id,
                        device_id = %alert.device_id,
                        category = ?alert.category,
                        priority = ?alert.priority,
                        "Alert created"
                    );
                    let id = alert.id.clone();
                    self.store.insert(alert).await;
                    id
                }
            }
        };

        self.process(tenant_id, settings, now).await;

        self.store
            .get(&id)
            .await
            .ok_or_else(|| AlertError::NotFound(id.clone()))
    }

    /// 调度周期：处理所有租户的待发送与到期告警，返回本轮发送成功的告警数
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut dispatched = 0;
        for tenant_id in self.store.active_tenants().await {
            let settings = match self.load_settings(&tenant_id).await {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(tenant_id = %tenant_id, error = %e, "Settings unavailable, tenant skipped this tick");
                    continue;
                }
            };
            dispatched += self.process(&tenant_id, &settings, now).await;
        }
        self.purge_history(now).await;
        dispatched
    }

    /// 按保留策略清理终态告警，返回删除条数
    pub async fn purge_history(&self, now: DateTime<Utc>) -> usize {
        let hours = self.config.history_retention_hours.min(MAX_RETENTION_HOURS);
        let max_age = chrono::Duration::hours(hours as i64);
        let removed = self
            .store
            .purge_terminal(now, max_age, self.config.max_history)
            .await;
        if removed > 0 {
            debug!(removed, "Alert history trimmed");
        }
        removed
    }

    /// 升级巡检
    pub async fn escalate(&self, now: DateTime<Utc>) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        for tenant_id in self.store.active_tenants().await {
            let settings = match self.load_settings(&tenant_id).await {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(tenant_id = %tenant_id, error = %e, "Settings unavailable, escalation skipped");
                    continue;
                }
            };
            let state = self.tenant_state(&tenant_id);
            let _guard = state.lock().await;
            let swept = self
                .escalation
                .sweep(&self.store, &tenant_id, &settings, now)
                .await;
            for id in &swept.expired {
                self.cancellations.remove(id);
            }
            outcome.merge(swept);
        }
        outcome
    }

    /// 调度一个租户
    ///
    /// 决策与限流额度在租户锁内完成，发送并发进行且不持锁，结果提交后再归还未用的额度。
    async fn process(
        &self,
        tenant_id: &str,
        settings: &NotificationSettings,
        now: DateTime<Utc>,
    ) -> usize {
        let policy = EffectivePolicy::from_settings(tenant_id, settings);
        let state = self.tenant_state(tenant_id);

        let outgoing = {
            let mut state = state.lock().await;
            state.housekeep(now);

            let mut outgoing = Vec::new();
            for id in self.store.due(tenant_id, now).await {
                if state.is_in_flight(&id) {
                    continue;
                }
                let Some(alert) = self.store.get(&id).await else {
                    continue;
                };

                let decision = if alert.state == AlertState::Pending {
                    state.decide_pending(&policy, &alert, now)
                } else {
                    state.decide_due(&policy, &alert, now)
                };

                match decision {
                    Decision::Schedule { at } => {
                        debug!(tenant_id = %tenant_id, alert_id = %id, at = %at, "Alert scheduled");
                        self.store.update(&id, |a| a.schedule(at)).await;
                    }
                    Decision::Suppress { reason, until } => {
                        debug!(tenant_id = %tenant_id, alert_id = %id, reason = ?reason, until = %until, "Alert suppressed");
                        self.store.update(&id, |a| a.suppress(reason, until)).await;
                    }
                    Decision::DispatchNow => {
                        state.begin_dispatch(&alert, now);
                        outgoing.push(alert);
                    }
                }
            }
            outgoing
        };

        if outgoing.is_empty() {
            return 0;
        }

        let delivered = join_all(
            outgoing
                .iter()
                .map(|alert| self.dispatch_alert(alert, settings, now)),
        )
        .await;

        let mut state = state.lock().await;
        let mut dispatched = 0;
        for (alert, delivered) in outgoing.iter().zip(delivered) {
            state.finish_dispatch(alert, now, delivered);
            if delivered {
                dispatched += 1;
            }
        }
        dispatched
    }

    /// 发送一轮并提交结果，确认优先于发送完成
    async fn dispatch_alert(
        &self,
        alert: &Alert,
        settings: &NotificationSettings,
        now: DateTime<Utc>,
    ) -> bool {
        let cancel = self
            .cancellations
            .entry(alert.id.clone())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe();

        let recipient = self.recipient(&alert.tenant_id);
        let report = self
            .dispatcher
            .dispatch(alert, settings, &recipient, cancel, now)
            .await;
        let sent = report.any_sent();

        let max = self.config.max_dispatch_count;
        let commit = self
            .store
            .update(&alert.id, |a| {
                if !a.is_open() {
                    return Commit::Superseded;
                }
                a.delivery_attempts += 1;
                if sent {
                    a.mark_dispatched(now);
                    Commit::Dispatched
                } else if a.delivery_attempts >= max {
                    a.expire(now);
                    Commit::Expired(AuditEvent::UnacknowledgedExpired {
                        alert_id: a.id.clone(),
                        tenant_id: a.tenant_id.clone(),
                        dispatch_count: a.dispatch_count,
                        delivery_attempts: a.delivery_attempts,
                        at: now,
                    })
                } else {
                    a.schedule(now);
                    Commit::Retry
                }
            })
            .await
            .unwrap_or(Commit::Superseded);

        self.store
            .append_audit(report.records.into_iter().map(AuditEvent::Dispatch))
            .await;

        match commit {
            Commit::Dispatched => {
                info!(
                    tenant_id = %alert.tenant_id,
                    alert_id = %alert.id,
                    priority = ?alert.priority,
                    escalation_level = alert.escalation_level,
                    "Alert dispatched"
                );
                true
            }
            Commit::Retry => {
                warn!(tenant_id = %alert.tenant_id, alert_id = %alert.id, "All channels failed, retrying next tick");
                false
            }
            Commit::Expired(event) => {
                warn!(
                    tenant_id = %alert.tenant_id,
                    alert_id = %alert.id,
                    "Delivery attempts exhausted, alert expired"
                );
                self.store.append_audit([event]).await;
                self.cancellations.remove(&alert.id);
                false
            }
            Commit::Superseded => {
                debug!(alert_id = %alert.id, "Alert closed during dispatch, result discarded");
                self.cancellations.remove(&alert.id);
                false
            }
        }
    }

    /// 确认告警
    ///
    /// 重复确认与确认已过期告警都是空操作；未知 ID 返回 `NotFound`。
    pub async fn acknowledge(
        &self,
        alert_id: &str,
        who: &str,
        when: DateTime<Utc>,
    ) -> Result<Alert> {
        let changed = self
            .store
            .update(alert_id, |a| a.acknowledge(who, when))
            .await
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;

        if changed {
            if let Some((_, tx)) = self.cancellations.remove(alert_id) {
                tx.send_replace(true);
            }
            info!(alert_id = %alert_id, by = %who, "Alert acknowledged");
        } else {
            debug!(alert_id = %alert_id, "Alert already closed, acknowledgment ignored");
        }

        self.store
            .get(alert_id)
            .await
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))
    }

    pub async fn get_alert(&self, alert_id: &str) -> Result<Alert> {
        self.store
            .get(alert_id)
            .await
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))
    }

    pub async fn list_alerts(&self, tenant_id: &str, state: Option<AlertState>) -> Vec<Alert> {
        self.store.list(tenant_id, state).await
    }

    /// 告警的发送记录
    pub async fn dispatch_records(&self, alert_id: &str) -> Result<Vec<DispatchRecord>> {
        self.get_alert(alert_id).await?;
        Ok(self.store.dispatch_records(alert_id).await)
    }

    pub async fn audit(&self, alert_id: &str) -> Result<Vec<AuditEvent>> {
        self.get_alert(alert_id).await?;
        Ok(self.store.audit_for(alert_id).await)
    }
}
