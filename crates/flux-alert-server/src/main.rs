mod config;

use anyhow::Result;
use clap::Parser;
use crate::config::{AppConfig, LoggingConfig};
use flux_alert::{service, AlertEngine};
use flux_alert_api::{create_router, AppState};
use flux_alert_config::{FileSource, SettingsStore};
use flux_notify::{
    ChatNotifier, EmailNotifier, InAppInbox, InAppNotifier, NotifyManager, PushNotifier,
    SmsNotifier,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "FLUX IOT Alert Daemon")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/flux-alertd.toml")]
    config: PathBuf,

    /// Override settings directory
    #[arg(long)]
    settings_dir: Option<PathBuf>,

    /// Override HTTP port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;
    if let Some(dir) = args.settings_dir {
        config.settings.directory = dir;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_logging(&config.logging);
    info!(config = %args.config.display(), "Starting flux-alertd");

    // 租户配置存储
    let source = Arc::new(FileSource::new(&config.settings.directory));
    let settings = Arc::new(
        SettingsStore::new(source).with_max_versions(config.settings.max_versions),
    );
    let loaded = settings.preload().await?;
    info!(tenants = loaded, directory = %config.settings.directory.display(), "Tenant settings loaded");

    let watch_handle = if config.settings.watch {
        Some(settings.clone().start_watching().await?)
    } else {
        None
    };

    // 通知渠道
    let inbox = InAppInbox::new();
    let notify_manager = Arc::new(NotifyManager::new(config.send_timeout()));
    register_notifiers(&notify_manager, &config, &inbox).await;

    // 告警引擎
    let engine = Arc::new(AlertEngine::new(
        settings.clone(),
        notify_manager,
        config.engine_config(),
    ));
    for recipient in &config.recipients {
        engine.register_recipient(recipient.tenant_id.clone(), recipient.to_recipient());
    }

    let (tasks, samples) = service::start(engine.clone(), config.service_config());

    let app = create_router(AppState::new(engine, settings, inbox).with_sample_queue(samples));
    let addr = config.bind_addr();
    info!(addr = %addr, "HTTP API listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tasks.shutdown().await;
    if let Some(handle) = watch_handle {
        handle.abort();
    }
    info!("flux-alertd stopped");

    Ok(())
}

/// 初始化日志，`RUST_LOG` 优先于配置文件
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// 注册通知器
async fn register_notifiers(notify_manager: &NotifyManager, config: &AppConfig, inbox: &InAppInbox) {
    // 站内消息总是可用
    notify_manager
        .register(Arc::new(InAppNotifier::new(inbox.clone())))
        .await;

    let channels = &config.channels;
    if let Some(email) = &channels.email {
        notify_manager
            .register(Arc::new(EmailNotifier::new(email.clone())))
            .await;
        info!(smtp_host = %email.smtp_host, "Email notifier registered");
    }
    if let Some(sms) = &channels.sms {
        notify_manager
            .register(Arc::new(SmsNotifier::new(sms.clone())))
            .await;
        info!("SMS notifier registered");
    }
    if let Some(push) = &channels.push {
        notify_manager
            .register(Arc::new(PushNotifier::new(push.clone())))
            .await;
        info!("Push notifier registered");
    }
    if let Some(chat) = &channels.chat {
        notify_manager
            .register(Arc::new(ChatNotifier::new(chat.clone())))
            .await;
        info!("Chat notifier registered");
    }

    let registered = notify_manager.channels().await;
    if registered.len() == 1 {
        warn!("Only the in-app channel is registered, external channels will report failures");
    }
    info!(channels = ?registered, "Notifier registration completed");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
