use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::model::{Alert, AlertCategory, AlertState, AuditEvent, DispatchRecord};

/// 审计日志默认保留条数
const DEFAULT_MAX_AUDIT: usize = 10_000;

/// 告警存储
///
/// 活跃告警与终态历史保存在同一张表里，审计日志只追加。
#[derive(Clone)]
pub struct AlertStore {
    alerts: Arc<RwLock<HashMap<String, Alert>>>,
    audit: Arc<RwLock<Vec<AuditEvent>>>,
    max_audit: usize,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::with_audit_capacity(DEFAULT_MAX_AUDIT)
    }

    pub fn with_audit_capacity(max_audit: usize) -> Self {
        Self {
            alerts: Arc::new(RwLock::new(HashMap::new())),
            audit: Arc::new(RwLock::new(Vec::new())),
            max_audit,
        }
    }

    pub async fn insert(&self, alert: Alert) {
        self.alerts.write().await.insert(alert.id.clone(), alert);
    }

    pub async fn get(&self, alert_id: &str) -> Option<Alert> {
        self.alerts.read().await.get(alert_id).cloned()
    }

    /// 在写锁内修改告警，返回闭包结果
    pub async fn update<R>(&self, alert_id: &str, f: impl FnOnce(&mut Alert) -> R) -> Option<R> {
        let mut alerts = self.alerts.write().await;
        alerts.get_mut(alert_id).map(f)
    }

    /// 租户告警，按创建时间排序
    pub async fn list(&self, tenant_id: &str, state: Option<AlertState>) -> Vec<Alert> {
        let alerts = self.alerts.read().await;
        let mut result: Vec<Alert> = alerts
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .filter(|a| state.map_or(true, |s| a.state == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        result
    }

    /// 同一 (设备, 类别) 的未结告警
    pub async fn find_open(
        &self,
        tenant_id: &str,
        device_id: &str,
        category: AlertCategory,
    ) -> Option<String> {
        let alerts = self.alerts.read().await;
        alerts
            .values()
            .find(|a| {
                a.is_open()
                    && a.tenant_id == tenant_id
                    && a.device_id == device_id
                    && a.category == category
            })
            .map(|a| a.id.clone())
    }

    /// 租户下需要调度的告警 ID
    ///
    /// 包括 `pending`，以及到期的 `scheduled` / `suppressed`。
    pub async fn due(&self, tenant_id: &str, now: DateTime<Utc>) -> Vec<String> {
        let alerts = self.alerts.read().await;
        let mut due: Vec<&Alert> = alerts
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .filter(|a| match a.state {
                AlertState::Pending => true,
                AlertState::Scheduled => a.scheduled_for.map_or(true, |at| at <= now),
                AlertState::Suppressed => a.suppressed_until.map_or(true, |at| at <= now),
                _ => false,
            })
            .collect();
        // 严重告警先处理，其余按创建顺序
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        due.into_iter().map(|a| a.id.clone()).collect()
    }

    /// 租户下已发送未确认的告警
    pub async fn dispatched(&self, tenant_id: &str) -> Vec<Alert> {
        self.list(tenant_id, Some(AlertState::Dispatched)).await
    }

    /// 有未结告警的租户
    pub async fn active_tenants(&self) -> Vec<String> {
        let alerts = self.alerts.read().await;
        alerts
            .values()
            .filter(|a| a.is_open())
            .map(|a| a.tenant_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.alerts.read().await.len()
    }

    /// 追加审计事件
    ///
    /// 超出容量时只淘汰最早的发送记录，过期记录保留到告警本身被清理。
    pub async fn append_audit(&self, events: impl IntoIterator<Item = AuditEvent>) {
        let mut audit = self.audit.write().await;
        audit.extend(events);
        if audit.len() <= self.max_audit {
            return;
        }

        let mut overflow = audit.len() - self.max_audit;
        let before = audit.len();
        audit.retain(|e| {
            if overflow > 0 && matches!(e, AuditEvent::Dispatch(_)) {
                overflow -= 1;
                false
            } else {
                true
            }
        });

        let dropped = before - audit.len();
        if dropped > 0 {
            warn!(
                dropped,
                capacity = self.max_audit,
                "Audit log full, oldest dispatch records dropped"
            );
        }
        if overflow > 0 {
            warn!(
                len = audit.len(),
                capacity = self.max_audit,
                "Audit log holds only expiry records, capacity exceeded"
            );
        }
    }

    /// 清理终态历史
    ///
    /// 删除关闭时间早于 `now - max_age` 的终态告警；剩余终态告警超过 `max_count` 时
    /// 从最早关闭的开始删除。相关审计事件一并删除，返回删除的告警数。
    pub async fn purge_terminal(
        &self,
        now: DateTime<Utc>,
        max_age: chrono::Duration,
        max_count: usize,
    ) -> usize {
        let mut alerts = self.alerts.write().await;
        let cutoff = now - max_age;

        let mut closed: Vec<(DateTime<Utc>, String)> = alerts
            .values()
            .filter_map(|a| a.closed_at().map(|at| (at, a.id.clone())))
            .collect();
        closed.sort();

        let over_count = closed.len().saturating_sub(max_count);
        let removed: HashSet<String> = closed
            .into_iter()
            .enumerate()
            .filter(|(i, (at, _))| *i < over_count || *at < cutoff)
            .map(|(_, (_, id))| id)
            .collect();
        if removed.is_empty() {
            return 0;
        }

        alerts.retain(|id, _| !removed.contains(id));
        drop(alerts);

        self.audit
            .write()
            .await
            .retain(|e| !removed.contains(e.alert_id()));
        info!(removed = removed.len(), "Terminal alerts purged");
        removed.len()
    }

    /// 告警的全部审计事件
    pub async fn audit_for(&self, alert_id: &str) -> Vec<AuditEvent> {
        self.audit
            .read()
            .await
            .iter()
            .filter(|e| e.alert_id() == alert_id)
            .cloned()
            .collect()
    }

    /// 告警的发送记录
    pub async fn dispatch_records(&self, alert_id: &str) -> Vec<DispatchRecord> {
        self.audit
            .read()
            .await
            .iter()
            .filter_map(|e| match e {
                AuditEvent::Dispatch(record) if record.alert_id == alert_id => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn audit_len(&self) -> usize {
        self.audit.read().await.len()
    }
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new()
    }
}
