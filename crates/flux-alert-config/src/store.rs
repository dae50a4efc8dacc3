use async_trait::async_trait;
use flux_alert::{
    AlertError, NotificationSettings, SettingsPatch, SettingsProvider, SettingsValidator,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{validate_tenant_id, ConfigError, Result};
use crate::source::SettingsSource;
use crate::version::{SettingsSection, SettingsVersion, VersionHistory};

/// 每个租户保留的历史版本数
pub const DEFAULT_MAX_VERSIONS: usize = 20;

/// 配置变更事件
#[derive(Debug, Clone)]
pub enum SettingsChange {
    Updated {
        tenant_id: String,
        old: NotificationSettings,
        new: NotificationSettings,
        version: u64,
    },
    RolledBack {
        tenant_id: String,
        to_version: u64,
        settings: NotificationSettings,
    },
    /// 配置源被外部修改后重新加载；`warnings` 非空表示内容未通过校验
    Reloaded {
        tenant_id: String,
        settings: NotificationSettings,
        warnings: Vec<String>,
    },
}

impl SettingsChange {
    pub fn tenant_id(&self) -> &str {
        match self {
            SettingsChange::Updated { tenant_id, .. }
            | SettingsChange::RolledBack { tenant_id, .. }
            | SettingsChange::Reloaded { tenant_id, .. } => tenant_id,
        }
    }
}

/// 租户通知配置存储
///
/// 更新在提交前校验，未通过校验的更新不会写入配置源；
/// 外部修改（热加载）即使未通过校验也会生效，由引擎按降级策略处理。
pub struct SettingsStore {
    source: Arc<dyn SettingsSource>,
    validator: SettingsValidator,
    cache: Arc<RwLock<HashMap<String, NotificationSettings>>>,
    versions: Arc<RwLock<HashMap<String, VersionHistory>>>,
    subscribers: Arc<RwLock<Vec<mpsc::Sender<SettingsChange>>>>,
    /// 串行化读-改-写
    write_lock: Mutex<()>,
    max_versions: usize,
}

impl SettingsStore {
    pub fn new(source: Arc<dyn SettingsSource>) -> Self {
        Self {
            source,
            validator: SettingsValidator::standard(),
            cache: Arc::new(RwLock::new(HashMap::new())),
            versions: Arc::new(RwLock::new(HashMap::new())),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            write_lock: Mutex::new(()),
            max_versions: DEFAULT_MAX_VERSIONS,
        }
    }

    pub fn with_validator(mut self, validator: SettingsValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_max_versions(mut self, max_versions: usize) -> Self {
        self.max_versions = max_versions;
        self
    }

    /// 预加载配置源中的所有租户，返回租户数
    pub async fn preload(&self) -> Result<usize> {
        let tenants = self.source.list_tenants().await?;
        for tenant_id in &tenants {
            if let Err(e) = self.reload(tenant_id).await {
                warn!(tenant_id = %tenant_id, error = %e, "Failed to preload settings");
            }
        }
        info!(tenants = tenants.len(), "Notification settings preloaded");
        Ok(tenants.len())
    }

    /// 获取租户配置，未配置的租户使用默认值
    pub async fn get_settings(&self, tenant_id: &str) -> Result<NotificationSettings> {
        validate_tenant_id(tenant_id)?;

        if let Some(settings) = self.cache.read().await.get(tenant_id) {
            return Ok(settings.clone());
        }

        let settings = match self.source.load(tenant_id).await? {
            Some(settings) => {
                if let Err(errors) = self.validator.validate(&settings) {
                    warn!(tenant_id = %tenant_id, errors = %errors, "Stored settings are invalid");
                }
                settings
            }
            None => {
                debug!(tenant_id = %tenant_id, "No stored settings, using defaults");
                NotificationSettings::default()
            }
        };

        self.cache
            .write()
            .await
            .insert(tenant_id.to_string(), settings.clone());
        Ok(settings)
    }

    /// 部分更新：合并、校验、保存
    pub async fn update_settings(
        &self,
        tenant_id: &str,
        patch: &SettingsPatch,
        author: &str,
        comment: &str,
    ) -> Result<NotificationSettings> {
        let _guard = self.write_lock.lock().await;
        let old = self.get_settings(tenant_id).await?;
        let new = old.apply(patch);
        self.commit(tenant_id, old, new, author, comment).await
    }

    /// 整体替换
    pub async fn replace_settings(
        &self,
        tenant_id: &str,
        settings: NotificationSettings,
        author: &str,
        comment: &str,
    ) -> Result<NotificationSettings> {
        let _guard = self.write_lock.lock().await;
        let old = self.get_settings(tenant_id).await?;
        self.commit(tenant_id, old, settings, author, comment).await
    }

    async fn commit(
        &self,
        tenant_id: &str,
        old: NotificationSettings,
        new: NotificationSettings,
        author: &str,
        comment: &str,
    ) -> Result<NotificationSettings> {
        if let Err(errors) = self.validator.validate(&new) {
            warn!(tenant_id = %tenant_id, errors = %errors, "Settings update rejected");
            return Err(ConfigError::Validation(errors));
        }

        self.source.save(tenant_id, &new).await?;
        self.cache
            .write()
            .await
            .insert(tenant_id.to_string(), new.clone());
        let version = self.record_version(tenant_id, new.clone(), author, comment).await;

        info!(tenant_id = %tenant_id, version = version, author = %author, "Notification settings updated");
        self.notify(SettingsChange::Updated {
            tenant_id: tenant_id.to_string(),
            old,
            new: new.clone(),
            version,
        })
        .await;

        Ok(new)
    }

    /// 回滚到历史版本（重新校验）
    pub async fn rollback(
        &self,
        tenant_id: &str,
        version: u64,
        author: &str,
    ) -> Result<NotificationSettings> {
        validate_tenant_id(tenant_id)?;
        let _guard = self.write_lock.lock().await;

        let settings = {
            let versions = self.versions.read().await;
            versions
                .get(tenant_id)
                .and_then(|v| v.get(version))
                .map(|v| v.settings.clone())
                .ok_or_else(|| ConfigError::VersionNotFound {
                    tenant_id: tenant_id.to_string(),
                    version,
                })?
        };

        self.validator.validate(&settings)?;
        self.source.save(tenant_id, &settings).await?;
        self.cache
            .write()
            .await
            .insert(tenant_id.to_string(), settings.clone());
        self.record_version(
            tenant_id,
            settings.clone(),
            author,
            &format!("Rollback to version {}", version),
        )
        .await;

        info!(tenant_id = %tenant_id, version = version, "Notification settings rolled back");
        self.notify(SettingsChange::RolledBack {
            tenant_id: tenant_id.to_string(),
            to_version: version,
            settings: settings.clone(),
        })
        .await;

        Ok(settings)
    }

    /// 从配置源重新加载
    pub async fn reload(&self, tenant_id: &str) -> Result<Option<NotificationSettings>> {
        validate_tenant_id(tenant_id)?;
        let _guard = self.write_lock.lock().await;

        let Some(settings) = self.source.load(tenant_id).await? else {
            return Ok(None);
        };

        if self.cache.read().await.get(tenant_id) == Some(&settings) {
            return Ok(Some(settings));
        }

        let warnings = match self.validator.validate(&settings) {
            Ok(()) => Vec::new(),
            Err(errors) => {
                warn!(
                    tenant_id = %tenant_id,
                    errors = %errors,
                    "Reloaded settings are invalid, engine will degrade"
                );
                errors.messages()
            }
        };

        self.cache
            .write()
            .await
            .insert(tenant_id.to_string(), settings.clone());
        self.record_version(tenant_id, settings.clone(), "system", "Hot reload")
            .await;

        info!(tenant_id = %tenant_id, "Notification settings reloaded");
        self.notify(SettingsChange::Reloaded {
            tenant_id: tenant_id.to_string(),
            settings: settings.clone(),
            warnings,
        })
        .await;

        Ok(Some(settings))
    }

    /// 版本历史（旧到新）
    pub async fn history(&self, tenant_id: &str) -> Vec<SettingsVersion> {
        self.versions
            .read()
            .await
            .get(tenant_id)
            .map(|v| v.list().to_vec())
            .unwrap_or_default()
    }

    /// 改动过指定分区的版本（旧到新）
    pub async fn history_touching(
        &self,
        tenant_id: &str,
        section: SettingsSection,
    ) -> Vec<SettingsVersion> {
        self.versions
            .read()
            .await
            .get(tenant_id)
            .map(|v| v.touching(section).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 已知租户（配置源与缓存）
    pub async fn tenants(&self) -> Result<Vec<String>> {
        let mut tenants: BTreeSet<String> = self.source.list_tenants().await?.into_iter().collect();
        tenants.extend(self.cache.read().await.keys().cloned());
        Ok(tenants.into_iter().collect())
    }

    /// 订阅配置变更
    pub async fn subscribe(&self) -> mpsc::Receiver<SettingsChange> {
        let (tx, rx) = mpsc::channel(32);
        self.subscribers.write().await.push(tx);
        rx
    }

    async fn record_version(
        &self,
        tenant_id: &str,
        settings: NotificationSettings,
        author: &str,
        comment: &str,
    ) -> u64 {
        let mut versions = self.versions.write().await;
        versions
            .entry(tenant_id.to_string())
            .or_insert_with(|| VersionHistory::new(self.max_versions))
            .record(settings, author, comment)
    }

    /// 通知所有订阅者，已关闭的订阅会被移除
    async fn notify(&self, change: SettingsChange) {
        let mut subscribers = self.subscribers.write().await;
        let mut alive = Vec::with_capacity(subscribers.len());
        for tx in subscribers.drain(..) {
            match tx.try_send(change.clone()) {
                Ok(()) => alive.push(tx),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(tenant_id = %change.tenant_id(), "Settings subscriber lagging, change dropped");
                    alive.push(tx);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        *subscribers = alive;
    }

    /// 启动配置源监听
    pub async fn start_watching(self: Arc<Self>) -> Result<JoinHandle<()>> {
        info!("Starting settings watcher");

        let mut watcher = self.source.watch().await?;

        Ok(tokio::spawn(async move {
            loop {
                match watcher.recv().await {
                    Some(tenant_id) => {
                        debug!(tenant_id = %tenant_id, "Settings change detected");
                        if let Err(e) = self.reload(&tenant_id).await {
                            warn!(tenant_id = %tenant_id, error = %e, "Failed to reload settings");
                        }
                    }
                    None => {
                        warn!("Settings watcher closed");
                        break;
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl SettingsProvider for SettingsStore {
    async fn get_settings(&self, tenant_id: &str) -> flux_alert::Result<NotificationSettings> {
        SettingsStore::get_settings(self, tenant_id)
            .await
            .map_err(|e| AlertError::SettingsUnavailable {
                tenant_id: tenant_id.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use flux_alert::{FrequencyPatch, ScheduleMode, ThresholdKey};

    fn store() -> SettingsStore {
        SettingsStore::new(Arc::new(MemorySource::new()))
    }

    fn patch(key: ThresholdKey, value: f64) -> SettingsPatch {
        let mut patch = SettingsPatch::default();
        patch.thresholds.insert(key, value);
        patch
    }

    #[tokio::test]
    async fn test_defaults_for_unknown_tenant() {
        let store = store();
        let settings = tokio_test::assert_ok!(store.get_settings("new-tenant").await);
        assert_eq!(settings, NotificationSettings::default());
        assert!(store.history("new-tenant").await.is_empty());
    }

    #[tokio::test]
    async fn test_update_round_trip() {
        let store = store();
        let updated = store
            .update_settings("t1", &patch(ThresholdKey::BatteryLow, 30.0), "alice", "raise battery")
            .await
            .unwrap();

        assert_eq!(updated.thresholds.battery_low, 30.0);
        assert_eq!(store.get_settings("t1").await.unwrap(), updated);

        let history = store.history("t1").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].author, "alice");
    }

    #[tokio::test]
    async fn test_invalid_update_is_not_committed() {
        let store = store();
        // very_low 高于 low
        let err = store
            .update_settings("t1", &patch(ThresholdKey::BatteryVeryLow, 50.0), "bob", "")
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert_eq!(store.get_settings("t1").await.unwrap(), NotificationSettings::default());
        assert!(store.history("t1").await.is_empty());
    }

    #[tokio::test]
    async fn test_rollback() {
        let store = store();
        store
            .update_settings("t1", &patch(ThresholdKey::InventoryLow, 10.0), "a", "v1")
            .await
            .unwrap();
        let mode = SettingsPatch {
            frequency: Some(FrequencyPatch {
                mode: Some(ScheduleMode::Batched),
                ..Default::default()
            }),
            ..Default::default()
        };
        store.update_settings("t1", &mode, "a", "v2").await.unwrap();

        let restored = store.rollback("t1", 1, "ops").await.unwrap();
        assert_eq!(restored.frequency.mode, ScheduleMode::Smart);
        assert_eq!(restored.thresholds.inventory_low, 10.0);
        assert_eq!(store.history("t1").await.len(), 3);

        // 设置与回滚都改动了频率分区
        let touching: Vec<u64> = store
            .history_touching("t1", SettingsSection::Frequency)
            .await
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(touching, vec![2, 3]);

        assert!(matches!(
            store.rollback("t1", 42, "ops").await,
            Err(ConfigError::VersionNotFound { version: 42, .. })
        ));
    }

    #[tokio::test]
    async fn test_subscribers_receive_changes() {
        let store = store();
        let mut rx = store.subscribe().await;

        store
            .update_settings("t1", &patch(ThresholdKey::SignalWeak, 40.0), "a", "")
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            SettingsChange::Updated { tenant_id, old, new, version } => {
                assert_eq!(tenant_id, "t1");
                assert_eq!(old.thresholds.signal_weak, 30.0);
                assert_eq!(new.thresholds.signal_weak, 40.0);
                assert_eq!(version, 1);
            }
            other => panic!("unexpected change: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reload_keeps_invalid_settings_with_warnings() {
        let source = MemorySource::new();
        let store = SettingsStore::new(Arc::new(source.clone()));

        let mut invalid = NotificationSettings::default();
        invalid.frequency.max_per_hour = 0;
        source.save("t1", &invalid).await.unwrap();

        let mut rx = store.subscribe().await;
        let loaded = store.reload("t1").await.unwrap().unwrap();
        assert_eq!(loaded.frequency.max_per_hour, 0);

        match rx.recv().await.unwrap() {
            SettingsChange::Reloaded { warnings, .. } => assert!(!warnings.is_empty()),
            other => panic!("unexpected change: {:?}", other),
        }

        // 没有变化时不重复记录
        store.reload("t1").await.unwrap();
        assert_eq!(store.history("t1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_tenant_id() {
        let store = store();
        assert!(matches!(
            store.get_settings("../x").await,
            Err(ConfigError::InvalidTenant(_))
        ));
    }
}
