use flux_alert::{
    AlertEngine, AlertState, EngineConfig, MetricKind, MetricSample, ScheduleMode, SettingsPatch,
    ThresholdKey,
};
use flux_alert_config::{FileSource, SettingsChange, SettingsStore};
use flux_notify::{InAppInbox, InAppNotifier, NotifyChannel, NotifyManager};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::{sleep, timeout, Duration};

#[tokio::test]
async fn test_settings_survive_restart() {
    let dir = TempDir::new().unwrap();

    let patch: SettingsPatch = serde_json::from_value(serde_json::json!({
        "thresholds": { "battery_low": 25.0, "battery_very_low": 12.0 },
        "channels": { "chat": true, "email": false },
        "frequency": { "mode": "quiet", "quiet_hours_start": "20:00", "quiet_hours_end": "06:30" },
        "utc_offset_minutes": 60
    }))
    .unwrap();

    let committed = {
        let store = SettingsStore::new(Arc::new(FileSource::new(dir.path())));
        store
            .update_settings("plant-7", &patch, "alice", "night shift")
            .await
            .unwrap()
    };

    // 新实例从文件读取，结果与提交时完全一致
    let store = SettingsStore::new(Arc::new(FileSource::new(dir.path())));
    assert_eq!(store.preload().await.unwrap(), 1);
    let loaded = store.get_settings("plant-7").await.unwrap();
    assert_eq!(loaded, committed);
    assert!(loaded.is_channel_enabled(NotifyChannel::Chat));
    assert!(!loaded.is_channel_enabled(NotifyChannel::Email));
    assert_eq!(loaded.frequency.mode, ScheduleMode::Quiet);
}

#[tokio::test]
async fn test_hot_reload_from_file() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FileSource::new(dir.path()));
    let store = Arc::new(SettingsStore::new(source));

    assert_eq!(store.get_settings("site-1").await.unwrap().thresholds.inventory_low, 20.0);

    let mut rx = store.subscribe().await;
    let _watch = store.clone().start_watching().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    std::fs::write(
        dir.path().join("site-1.toml"),
        "[thresholds]\ninventory_low = 35.0\n",
    )
    .unwrap();

    let change = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no reload within timeout")
        .unwrap();
    assert!(matches!(change, SettingsChange::Reloaded { ref tenant_id, .. } if tenant_id == "site-1"));
    assert_eq!(store.get_settings("site-1").await.unwrap().thresholds.inventory_low, 35.0);
}

#[tokio::test]
async fn test_engine_uses_committed_settings() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SettingsStore::new(Arc::new(FileSource::new(dir.path()))));

    let inbox = InAppInbox::new();
    let manager = NotifyManager::default();
    manager.register(Arc::new(InAppNotifier::new(inbox.clone()))).await;
    let engine = AlertEngine::new(store.clone(), Arc::new(manager), EngineConfig::default());

    let mut patch = SettingsPatch::default();
    patch.thresholds.insert(ThresholdKey::InventoryLow, 50.0);
    patch.frequency = Some(flux_alert::FrequencyPatch {
        mode: Some(ScheduleMode::Immediate),
        ..Default::default()
    });

    // 默认阈值 20，45% 不告警
    let sample = MetricSample::new("bin-4", MetricKind::Inventory, 45.0);
    assert!(engine.ingest("acme", sample.clone()).await.unwrap().is_none());

    store.update_settings("acme", &patch, "ops", "earlier restock").await.unwrap();
    let alert = engine.ingest("acme", sample).await.unwrap().unwrap();
    assert_eq!(alert.state, AlertState::Dispatched);
    assert_eq!(inbox.messages("acme").await.len(), 1);
}
