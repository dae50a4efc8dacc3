use crate::message::{NotifyChannel, NotifyMessage, Recipient};
use anyhow::Result;
use async_trait::async_trait;

/// 通知结果
#[derive(Debug, Clone)]
pub struct NotifyResult {
    pub success: bool,
    pub message: String,
}

impl NotifyResult {
    pub fn success() -> Self {
        Self {
            success: true,
            message: "Notification sent successfully".to_string(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// 通知器 trait
///
/// 每个渠道一个实现。超时由 `NotifyManager` 统一施加，实现本身无需处理。
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 发送通知
    async fn send(&self, recipient: &Recipient, message: &NotifyMessage) -> Result<NotifyResult>;

    /// 所属渠道
    fn channel(&self) -> NotifyChannel;

    /// 通知器名称
    fn name(&self) -> &str {
        self.channel().as_str()
    }
}
