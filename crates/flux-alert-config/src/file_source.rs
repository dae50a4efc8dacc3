use anyhow::{bail, Result};
use async_trait::async_trait;
use flux_alert::NotificationSettings;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::validate_tenant_id;
use crate::source::{SettingsSource, SettingsWatcher};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Toml,
    Json,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Toml => "toml",
            FileFormat::Json => "json",
        }
    }

    fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Some(FileFormat::Toml),
            Some("json") => Some(FileFormat::Json),
            _ => None,
        }
    }

    fn parse(&self, content: &str) -> Result<NotificationSettings> {
        Ok(match self {
            FileFormat::Toml => toml::from_str(content)?,
            FileFormat::Json => serde_json::from_str(content)?,
        })
    }

    fn render(&self, settings: &NotificationSettings) -> Result<String> {
        Ok(match self {
            FileFormat::Toml => toml::to_string_pretty(settings)?,
            FileFormat::Json => serde_json::to_string_pretty(settings)?,
        })
    }
}

/// 文件配置源
///
/// 每个租户一个文件 `<dir>/<tenant_id>.toml`（或 `.json`）。
/// 读取时两种格式都接受，写入使用配置的格式。
pub struct FileSource {
    dir: PathBuf,
    format: FileFormat,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_format(dir, FileFormat::default())
    }

    pub fn with_format(dir: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, tenant_id: &str, format: FileFormat) -> Result<PathBuf> {
        if validate_tenant_id(tenant_id).is_err() {
            bail!("invalid tenant id {:?}", tenant_id);
        }
        Ok(self.dir.join(format!("{}.{}", tenant_id, format.extension())))
    }

    /// 变更事件中的文件对应的租户
    fn tenant_of(path: &Path) -> Option<String> {
        FileFormat::from_path(path)?;
        let stem = path.file_stem()?.to_str()?;
        validate_tenant_id(stem).ok()?;
        Some(stem.to_string())
    }
}

#[async_trait]
impl SettingsSource for FileSource {
    async fn load(&self, tenant_id: &str) -> Result<Option<NotificationSettings>> {
        let other = match self.format {
            FileFormat::Toml => FileFormat::Json,
            FileFormat::Json => FileFormat::Toml,
        };

        for format in [self.format, other] {
            let path = self.path_for(tenant_id, format)?;
            if !fs::try_exists(&path).await? {
                continue;
            }
            debug!("Loading settings from file: {:?}", path);
            let content = fs::read_to_string(&path).await?;
            return format.parse(&content).map(Some);
        }

        Ok(None)
    }

    async fn save(&self, tenant_id: &str, settings: &NotificationSettings) -> Result<()> {
        let path = self.path_for(tenant_id, self.format)?;
        debug!("Saving settings to file: {:?}", path);

        fs::create_dir_all(&self.dir).await?;
        let content = self.format.render(settings)?;

        // 先写临时文件再改名，监听方不会读到半个文件
        let tmp = path.with_extension(format!("{}.tmp", self.format.extension()));
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;

        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        let mut tenants = Vec::new();
        if !fs::try_exists(&self.dir).await? {
            return Ok(tenants);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(tenant) = Self::tenant_of(&entry.path()) {
                tenants.push(tenant);
            }
        }
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }

    async fn watch(&self) -> Result<SettingsWatcher> {
        fs::create_dir_all(&self.dir).await?;

        let (tx, rx) = mpsc::channel(64);
        let dir = self.dir.clone();

        std::thread::spawn(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher: RecommendedWatcher =
                match Watcher::new(notify_tx, notify::Config::default()) {
                    Ok(watcher) => watcher,
                    Err(e) => {
                        error!("Failed to create settings watcher: {}", e);
                        return;
                    }
                };

            if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                error!("Failed to watch settings directory {:?}: {}", dir, e);
                return;
            }

            debug!("Settings watcher started for: {:?}", dir);

            loop {
                match notify_rx.recv() {
                    Ok(Ok(Event { kind, paths, .. })) => {
                        use notify::EventKind::*;
                        if !matches!(kind, Modify(_) | Create(_)) {
                            continue;
                        }
                        for tenant in paths.iter().filter_map(|p| Self::tenant_of(p)) {
                            debug!("Settings file changed for tenant {}", tenant);
                            if tx.blocking_send(tenant).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        error!("Watch error: {}", e);
                    }
                    Err(e) => {
                        error!("Channel error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(SettingsWatcher::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use flux_alert::{AlertCategory, Priority, ScheduleMode, ThresholdKey};
    use flux_notify::NotifyChannel;
    use tempfile::TempDir;

    fn customised() -> NotificationSettings {
        let mut settings = NotificationSettings::default();
        settings.thresholds.battery_low = 35.0;
        settings.alert_types.insert(AlertCategory::Energy, false);
        settings.channels.insert(NotifyChannel::Sms, true);
        settings.priorities.insert(ThresholdKey::SignalWeak, Priority::Medium);
        settings.frequency.mode = ScheduleMode::Quiet;
        settings.frequency.quiet_hours_start = NaiveTime::from_hms_opt(21, 30, 0).unwrap();
        settings.utc_offset_minutes = -300;
        settings
    }

    #[tokio::test]
    async fn test_file_source_toml() {
        let dir = TempDir::new().unwrap();
        let source = FileSource::new(dir.path());

        source.save("acme", &customised()).await.unwrap();
        assert!(dir.path().join("acme.toml").exists());

        let loaded = source.load("acme").await.unwrap();
        assert_eq!(loaded, Some(customised()));
    }

    #[tokio::test]
    async fn test_file_source_json() {
        let dir = TempDir::new().unwrap();
        let source = FileSource::with_format(dir.path(), FileFormat::Json);

        source.save("acme", &customised()).await.unwrap();
        assert!(dir.path().join("acme.json").exists());

        let loaded = source.load("acme").await.unwrap();
        assert_eq!(loaded, Some(customised()));

        // TOML 源也能读到 JSON 文件
        let toml_source = FileSource::new(dir.path());
        assert_eq!(toml_source.load("acme").await.unwrap(), Some(customised()));
    }

    #[tokio::test]
    async fn test_missing_and_partial_files() {
        let dir = TempDir::new().unwrap();
        let source = FileSource::new(dir.path());
        assert!(source.load("nobody").await.unwrap().is_none());

        std::fs::write(
            dir.path().join("partial.toml"),
            "[frequency]\nmode = \"batched\"\nmax_per_hour = 4\n",
        )
        .unwrap();
        let loaded = source.load("partial").await.unwrap().unwrap();
        assert_eq!(loaded.frequency.mode, ScheduleMode::Batched);
        assert_eq!(loaded.frequency.max_per_hour, 4);
        assert_eq!(loaded.thresholds, NotificationSettings::default().thresholds);
    }

    #[tokio::test]
    async fn test_list_tenants_and_reject_bad_ids() {
        let dir = TempDir::new().unwrap();
        let source = FileSource::new(dir.path());
        source.save("b-site", &NotificationSettings::default()).await.unwrap();
        source.save("a-site", &NotificationSettings::default()).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(source.list_tenants().await.unwrap(), vec!["a-site", "b-site"]);
        assert!(source.save("../escape", &NotificationSettings::default()).await.is_err());
    }
}
