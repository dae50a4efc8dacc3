use crate::message::{NotifyChannel, NotifyMessage, Recipient};
use crate::notifier::Notifier;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 默认单渠道发送超时
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// 通知发送错误
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("No notifier registered for channel {0}")]
    NotRegistered(NotifyChannel),

    #[error("Send via {channel} timed out after {timeout_ms}ms")]
    Timeout {
        channel: NotifyChannel,
        timeout_ms: u128,
    },

    #[error("Send via {channel} rejected: {reason}")]
    Rejected {
        channel: NotifyChannel,
        reason: String,
    },

    #[error("Send via {channel} failed: {source}")]
    Transport {
        channel: NotifyChannel,
        #[source]
        source: anyhow::Error,
    },
}

/// 通知管理器
///
/// 按渠道持有通知器，并对每次发送施加超时，慢渠道不会拖住其他渠道。
pub struct NotifyManager {
    /// 通知器列表
    notifiers: Arc<RwLock<HashMap<NotifyChannel, Arc<dyn Notifier>>>>,

    /// 单渠道发送超时
    send_timeout: Duration,
}

impl NotifyManager {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            notifiers: Arc::new(RwLock::new(HashMap::new())),
            send_timeout,
        }
    }

    /// 注册通知器（同一渠道后注册的覆盖先注册的）
    pub async fn register(&self, notifier: Arc<dyn Notifier>) {
        let channel = notifier.channel();
        let mut notifiers = self.notifiers.write().await;
        info!(channel = %channel, "Registered notifier: {}", notifier.name());
        notifiers.insert(channel, notifier);
    }

    /// 渠道是否已注册
    pub async fn is_registered(&self, channel: NotifyChannel) -> bool {
        self.notifiers.read().await.contains_key(&channel)
    }

    /// 已注册的渠道
    pub async fn channels(&self) -> Vec<NotifyChannel> {
        let mut channels: Vec<_> = self.notifiers.read().await.keys().copied().collect();
        channels.sort();
        channels
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// 发送通知到指定渠道
    pub async fn send(
        &self,
        channel: NotifyChannel,
        recipient: &Recipient,
        message: &NotifyMessage,
    ) -> Result<(), NotifyError> {
        let notifier = {
            let notifiers = self.notifiers.read().await;
            notifiers
                .get(&channel)
                .cloned()
                .ok_or(NotifyError::NotRegistered(channel))?
        };

        match tokio::time::timeout(self.send_timeout, notifier.send(recipient, message)).await {
            Ok(Ok(result)) if result.success => {
                debug!(
                    channel = %channel,
                    recipient = %recipient.id,
                    "Notification sent: {}",
                    message.title
                );
                Ok(())
            }
            Ok(Ok(result)) => {
                warn!(channel = %channel, recipient = %recipient.id, "Notification rejected: {}", result.message);
                Err(NotifyError::Rejected {
                    channel,
                    reason: result.message,
                })
            }
            Ok(Err(e)) => {
                warn!(channel = %channel, recipient = %recipient.id, error = %e, "Notification error");
                Err(NotifyError::Transport { channel, source: e })
            }
            Err(_) => {
                warn!(channel = %channel, recipient = %recipient.id, "Notification timed out");
                Err(NotifyError::Timeout {
                    channel,
                    timeout_ms: self.send_timeout.as_millis(),
                })
            }
        }
    }
}

impl Default for NotifyManager {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}
