use crate::message::{NotifyChannel, NotifyLevel, NotifyMessage, Recipient};
use crate::notifier::{Notifier, NotifyResult};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

// ============================================================================
// 站内消息
// ============================================================================

/// 每个接收人保留的站内消息条数
const INBOX_CAPACITY: usize = 500;

/// 站内消息收件箱
///
/// 按接收人保存最近的消息，并向实时订阅者广播。
#[derive(Clone)]
pub struct InAppInbox {
    messages: Arc<RwLock<HashMap<String, Vec<NotifyMessage>>>>,
    live_tx: broadcast::Sender<(String, NotifyMessage)>,
}

impl InAppInbox {
    pub fn new() -> Self {
        let (live_tx, _) = broadcast::channel(256);
        Self {
            messages: Arc::new(RwLock::new(HashMap::new())),
            live_tx,
        }
    }

    async fn push(&self, recipient: &str, message: NotifyMessage) {
        {
            let mut messages = self.messages.write().await;
            let inbox = messages.entry(recipient.to_string()).or_default();
            inbox.push(message.clone());
            if inbox.len() > INBOX_CAPACITY {
                inbox.remove(0);
            }
        }
        // 没有订阅者时发送失败是正常的
        let _ = self.live_tx.send((recipient.to_string(), message));
    }

    /// 获取接收人的消息（按时间先后）
    pub async fn messages(&self, recipient: &str) -> Vec<NotifyMessage> {
        self.messages
            .read()
            .await
            .get(recipient)
            .cloned()
            .unwrap_or_default()
    }

    /// 清空接收人的消息，返回清除条数
    pub async fn clear(&self, recipient: &str) -> usize {
        self.messages
            .write()
            .await
            .remove(recipient)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// 订阅实时消息
    pub fn subscribe(&self) -> broadcast::Receiver<(String, NotifyMessage)> {
        self.live_tx.subscribe()
    }
}

impl Default for InAppInbox {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InAppNotifier {
    inbox: InAppInbox,
}

impl InAppNotifier {
    pub fn new(inbox: InAppInbox) -> Self {
        Self { inbox }
    }
}

#[async_trait]
impl Notifier for InAppNotifier {
    async fn send(&self, recipient: &Recipient, message: &NotifyMessage) -> Result<NotifyResult> {
        self.inbox.push(&recipient.id, message.clone()).await;
        Ok(NotifyResult::success())
    }

    fn channel(&self) -> NotifyChannel {
        NotifyChannel::InApp
    }
}

// ============================================================================
// 邮件通知
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    /// 接收人没有邮箱时使用的默认地址
    #[serde(default)]
    pub fallback_to: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn format_body(message: &NotifyMessage) -> String {
        format!(
            "{}\n\nLevel: {:?}\nTime: {}",
            message.content,
            message.level,
            message.timestamp.to_rfc3339()
        )
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, recipient: &Recipient, message: &NotifyMessage) -> Result<NotifyResult> {
        use lettre::message::header::ContentType;
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

        let to = match recipient.email.as_ref().or(self.config.fallback_to.as_ref()) {
            Some(to) => to,
            None => {
                return Ok(NotifyResult::failure(format!(
                    "No email address for recipient {}",
                    recipient.id
                )))
            }
        };

        let email = Message::builder()
            .from(self.config.from.parse()?)
            .to(to.parse()?)
            .subject(&message.title)
            .header(ContentType::TEXT_PLAIN)
            .body(Self::format_body(message))?;

        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)?
            .credentials(creds)
            .port(self.config.smtp_port)
            .build();

        match mailer.send(email).await {
            Ok(_) => Ok(NotifyResult::success()),
            Err(e) => Ok(NotifyResult::failure(format!("Email send failed: {}", e))),
        }
    }

    fn channel(&self) -> NotifyChannel {
        NotifyChannel::Email
    }
}

// ============================================================================
// 短信通知（HTTP 网关）
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    pub gateway_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
}

pub struct SmsNotifier {
    config: SmsConfig,
    client: reqwest::Client,
}

impl SmsNotifier {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn build_message(&self, phone: &str, message: &NotifyMessage) -> serde_json::Value {
        // 短信只发标题和正文，不带元数据
        serde_json::json!({
            "to": phone,
            "from": self.config.sender_id,
            "text": format!("{}: {}", message.title, message.content),
        })
    }
}

#[async_trait]
impl Notifier for SmsNotifier {
    async fn send(&self, recipient: &Recipient, message: &NotifyMessage) -> Result<NotifyResult> {
        let Some(phone) = recipient.phone.as_deref() else {
            return Ok(NotifyResult::failure(format!(
                "No phone number for recipient {}",
                recipient.id
            )));
        };

        let mut request = self
            .client
            .post(&self.config.gateway_url)
            .json(&self.build_message(phone, message));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        if response.status().is_success() {
            Ok(NotifyResult::success())
        } else {
            Ok(NotifyResult::failure(format!(
                "SMS gateway failed with status: {}",
                response.status()
            )))
        }
    }

    fn channel(&self) -> NotifyChannel {
        NotifyChannel::Sms
    }
}

// ============================================================================
// 移动推送
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

pub struct PushNotifier {
    config: PushConfig,
    client: reqwest::Client,
}

impl PushNotifier {
    pub fn new(config: PushConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn build_message(&self, token: &str, message: &NotifyMessage) -> serde_json::Value {
        let priority = match message.level {
            NotifyLevel::Info | NotifyLevel::Warning => "normal",
            NotifyLevel::Error | NotifyLevel::Critical => "high",
        };

        serde_json::json!({
            "token": token,
            "priority": priority,
            "notification": {
                "title": message.title,
                "body": message.content,
            },
            "data": message.metadata,
        })
    }
}

#[async_trait]
impl Notifier for PushNotifier {
    async fn send(&self, recipient: &Recipient, message: &NotifyMessage) -> Result<NotifyResult> {
        let Some(token) = recipient.push_token.as_deref() else {
            return Ok(NotifyResult::failure(format!(
                "No push token for recipient {}",
                recipient.id
            )));
        };

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .json(&self.build_message(token, message));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        if response.status().is_success() {
            Ok(NotifyResult::success())
        } else {
            Ok(NotifyResult::failure(format!(
                "Push failed with status: {}",
                response.status()
            )))
        }
    }

    fn channel(&self) -> NotifyChannel {
        NotifyChannel::Push
    }
}

// ============================================================================
// 聊天机器人（Slack 兼容 Webhook）
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub webhook_url: String,
}

pub struct ChatNotifier {
    config: ChatConfig,
    client: reqwest::Client,
}

impl ChatNotifier {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn build_message(&self, recipient: &Recipient, message: &NotifyMessage) -> serde_json::Value {
        let color = match message.level {
            NotifyLevel::Info => "good",
            NotifyLevel::Warning => "warning",
            NotifyLevel::Error | NotifyLevel::Critical => "danger",
        };

        let text = match &recipient.chat_handle {
            Some(handle) => format!("<@{}> {}", handle, message.content),
            None => message.content.clone(),
        };

        serde_json::json!({
            "attachments": [{
                "color": color,
                "title": message.title,
                "text": text,
                "fields": [
                    {
                        "title": "Level",
                        "value": format!("{:?}", message.level),
                        "short": true
                    },
                    {
                        "title": "Time",
                        "value": message.timestamp.to_rfc3339(),
                        "short": true
                    }
                ]
            }]
        })
    }
}

#[async_trait]
impl Notifier for ChatNotifier {
    async fn send(&self, recipient: &Recipient, message: &NotifyMessage) -> Result<NotifyResult> {
        let body = self.build_message(recipient, message);

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(NotifyResult::success())
        } else {
            Ok(NotifyResult::failure(format!(
                "Chat webhook failed: {}",
                response.status()
            )))
        }
    }

    fn channel(&self) -> NotifyChannel {
        NotifyChannel::Chat
    }
}
