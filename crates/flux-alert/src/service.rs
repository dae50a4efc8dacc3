use anyhow::anyhow;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::engine::AlertEngine;
use crate::error::{AlertError, Result};
use crate::model::MetricSample;

/// 后台任务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// 调度周期（秒）
    pub tick_interval_secs: u64,
    /// 升级巡检周期（秒）
    pub escalation_interval_secs: u64,
    /// 样本队列长度
    pub sample_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
            escalation_interval_secs: 60,
            sample_buffer: 1024,
        }
    }
}

/// 带租户的样本
#[derive(Debug, Clone)]
pub struct TenantSample {
    pub tenant_id: String,
    pub sample: MetricSample,
}

/// 样本推送端，可在多个数据源之间克隆
#[derive(Clone)]
pub struct SampleSender {
    tx: mpsc::Sender<TenantSample>,
}

impl SampleSender {
    /// 推送样本，队列满时等待
    pub async fn send(&self, tenant_id: impl Into<String>, sample: MetricSample) -> Result<()> {
        self.tx
            .send(TenantSample {
                tenant_id: tenant_id.into(),
                sample,
            })
            .await
            .map_err(|_| AlertError::Other(anyhow!("sample ingestion stopped")))
    }
}

/// 后台任务句柄
pub struct EngineTaskHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handles: Vec<JoinHandle<()>>,
}

impl EngineTaskHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.join_handles {
            let _ = handle.await;
        }
        info!("Alert engine tasks stopped");
    }

    pub fn abort(self) {
        for handle in self.join_handles {
            handle.abort();
        }
    }
}

/// 等待关闭信号
async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// 启动调度、升级巡检与样本接收任务
pub fn start(engine: Arc<AlertEngine>, config: ServiceConfig) -> (EngineTaskHandle, SampleSender) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (sample_tx, mut sample_rx) = mpsc::channel::<TenantSample>(config.sample_buffer.max(1));

    info!(
        tick_interval_secs = config.tick_interval_secs,
        escalation_interval_secs = config.escalation_interval_secs,
        "Starting alert engine tasks"
    );

    let tick_task = {
        let engine = engine.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        let period = Duration::from_secs(config.tick_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let dispatched = engine.tick(Utc::now()).await;
                        if dispatched > 0 {
                            debug!(dispatched = dispatched, "Scheduler tick");
                        }
                    }
                    _ = stopped(&mut shutdown_rx) => break,
                }
            }
        })
    };

    let escalation_task = {
        let engine = engine.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        let period = Duration::from_secs(config.escalation_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let outcome = engine.escalate(now).await;
                        if !outcome.requeued.is_empty() {
                            // 重新进入调度的告警立即处理
                            engine.tick(now).await;
                        }
                        if !outcome.is_empty() {
                            info!(
                                requeued = outcome.requeued.len(),
                                expired = outcome.expired.len(),
                                "Escalation sweep"
                            );
                        }
                    }
                    _ = stopped(&mut shutdown_rx) => break,
                }
            }
        })
    };

    let ingest_task = {
        let mut shutdown_rx = shutdown_rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = sample_rx.recv() => {
                        let Some(TenantSample { tenant_id, sample }) = received else {
                            break;
                        };
                        match engine.ingest(&tenant_id, sample).await {
                            Ok(_) => {}
                            Err(AlertError::InvalidSample(reason)) => {
                                warn!(tenant_id = %tenant_id, reason = %reason, "Sample dropped");
                            }
                            Err(e) => {
                                error!(tenant_id = %tenant_id, error = %e, "Sample ingestion failed");
                            }
                        }
                    }
                    _ = stopped(&mut shutdown_rx) => break,
                }
            }
        })
    };

    (
        EngineTaskHandle {
            shutdown_tx,
            join_handles: vec![tick_task, escalation_task, ingest_task],
        },
        SampleSender { tx: sample_tx },
    )
}
