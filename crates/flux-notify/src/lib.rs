pub mod manager;
pub mod message;
pub mod notifier;
pub mod providers;

pub use manager::{NotifyError, NotifyManager};
pub use message::{NotifyChannel, NotifyLevel, NotifyMessage, Recipient};
pub use notifier::{Notifier, NotifyResult};
pub use providers::{
    ChatConfig, ChatNotifier, EmailConfig, EmailNotifier, InAppInbox, InAppNotifier, PushConfig,
    PushNotifier, SmsConfig, SmsNotifier,
};
