use anyhow::Result;
use async_trait::async_trait;
use flux_alert::NotificationSettings;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// 配置源抽象（按租户存取）
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// 加载租户配置，不存在时返回 None
    async fn load(&self, tenant_id: &str) -> Result<Option<NotificationSettings>>;

    /// 保存租户配置
    async fn save(&self, tenant_id: &str, settings: &NotificationSettings) -> Result<()>;

    /// 已保存配置的租户
    async fn list_tenants(&self) -> Result<Vec<String>>;

    /// 监听配置变更
    async fn watch(&self) -> Result<SettingsWatcher>;
}

/// 配置监听器，收到的是发生变更的租户 ID
pub struct SettingsWatcher {
    rx: mpsc::Receiver<String>,
}

impl SettingsWatcher {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// 内存配置源
#[derive(Clone, Default)]
pub struct MemorySource {
    settings: Arc<RwLock<HashMap<String, NotificationSettings>>>,
    watchers: Arc<RwLock<Vec<mpsc::Sender<String>>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绕过存储直接写入（模拟外部修改），并通知监听者
    pub async fn put_external(&self, tenant_id: &str, settings: NotificationSettings) {
        self.settings
            .write()
            .await
            .insert(tenant_id.to_string(), settings);
        let watchers = self.watchers.read().await;
        for tx in watchers.iter() {
            let _ = tx.send(tenant_id.to_string()).await;
        }
    }
}

#[async_trait]
impl SettingsSource for MemorySource {
    async fn load(&self, tenant_id: &str) -> Result<Option<NotificationSettings>> {
        Ok(self.settings.read().await.get(tenant_id).cloned())
    }

    async fn save(&self, tenant_id: &str, settings: &NotificationSettings) -> Result<()> {
        self.settings
            .write()
            .await
            .insert(tenant_id.to_string(), settings.clone());
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        let mut tenants: Vec<String> = self.settings.read().await.keys().cloned().collect();
        tenants.sort();
        Ok(tenants)
    }

    async fn watch(&self) -> Result<SettingsWatcher> {
        let (tx, rx) = mpsc::channel(16);
        self.watchers.write().await.push(tx);
        Ok(SettingsWatcher::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_source() {
        let source = MemorySource::new();
        assert!(source.load("t1").await.unwrap().is_none());

        let mut settings = NotificationSettings::default();
        settings.frequency.max_per_hour = 3;
        source.save("t1", &settings).await.unwrap();

        assert_eq!(source.load("t1").await.unwrap(), Some(settings));
        assert_eq!(source.list_tenants().await.unwrap(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_external_change_notifies_watchers() {
        let source = MemorySource::new();
        let mut watcher = source.watch().await.unwrap();

        source.put_external("t2", NotificationSettings::default()).await;
        assert_eq!(watcher.recv().await.as_deref(), Some("t2"));
    }
}
