use flux_alert::{AlertEngine, SampleSender};
use flux_alert_config::SettingsStore;
use flux_notify::InAppInbox;
use std::sync::Arc;

/// API 应用状态
#[derive(Clone)]
pub struct AppState {
    /// 告警引擎
    pub engine: Arc<AlertEngine>,
    /// 租户配置存储
    pub settings: Arc<SettingsStore>,
    /// 站内消息
    pub inbox: InAppInbox,
    /// 后台样本队列，未启动时为空
    pub samples: Option<SampleSender>,
}

impl AppState {
    pub fn new(engine: Arc<AlertEngine>, settings: Arc<SettingsStore>, inbox: InAppInbox) -> Self {
        Self {
            engine,
            settings,
            inbox,
            samples: None,
        }
    }

    /// 接入后台样本队列
    pub fn with_sample_queue(mut self, samples: SampleSender) -> Self {
        self.samples = Some(samples);
        self
    }
}
