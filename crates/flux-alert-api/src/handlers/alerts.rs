use crate::{
    error::{ApiError, Result},
    models::*,
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use flux_alert::{Alert, AuditEvent, DispatchRecord, ExternalAlert, MetricSample};
use tracing::{debug, info};

/// 上报指标样本
pub async fn ingest_sample(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<SampleRequest>,
) -> Result<Json<AlertOutcome>> {
    debug!(tenant_id = %tenant_id, device_id = %req.device_id, "Ingesting sample");

    let alert = state.engine.ingest(&tenant_id, MetricSample::from(req)).await?;
    Ok(Json(AlertOutcome { alert }))
}

/// 批量上报样本，交给后台队列异步评估
///
/// 整批先校验，任一样本格式错误则整批拒绝。
pub async fn enqueue_samples(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<Vec<SampleRequest>>,
) -> Result<(StatusCode, Json<QueuedSamples>)> {
    let queue = state
        .samples
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("sample queue is not running".to_string()))?;

    let samples: Vec<MetricSample> = req.into_iter().map(MetricSample::from).collect();
    for sample in &samples {
        sample.validate()?;
    }

    let queued = samples.len();
    for sample in samples {
        queue
            .send(tenant_id.as_str(), sample)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    }
    debug!(tenant_id = %tenant_id, queued, "Samples queued");

    Ok((StatusCode::ACCEPTED, Json(QueuedSamples { queued })))
}

/// 上报外部告警
pub async fn raise_alert(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(event): Json<ExternalAlert>,
) -> Result<(StatusCode, Json<AlertOutcome>)> {
    info!(tenant_id = %tenant_id, device_id = %event.device_id, category = ?event.category, "Raising external alert");

    let alert = state.engine.raise(&tenant_id, event).await?;
    let status = if alert.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(AlertOutcome { alert })))
}

/// 列出租户告警
pub async fn list_alerts(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<ListAlertsQuery>,
) -> Result<Json<Vec<Alert>>> {
    debug!(tenant_id = %tenant_id, state = ?query.state, "Listing alerts");

    Ok(Json(state.engine.list_alerts(&tenant_id, query.state).await))
}

/// 获取告警
pub async fn get_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Json<Alert>> {
    debug!(alert_id = %alert_id, "Getting alert");

    Ok(Json(state.engine.get_alert(&alert_id).await?))
}

/// 确认告警
pub async fn acknowledge(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    Json(req): Json<AcknowledgeRequest>,
) -> Result<Json<Alert>> {
    info!(alert_id = %alert_id, who = %req.who, "Acknowledging alert");

    let when = req.when.unwrap_or_else(Utc::now);
    let alert = state.engine.acknowledge(&alert_id, &req.who, when).await?;
    Ok(Json(alert))
}

/// 告警的发送记录
pub async fn list_dispatches(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Json<Vec<DispatchRecord>>> {
    debug!(alert_id = %alert_id, "Listing dispatch records");

    Ok(Json(state.engine.dispatch_records(&alert_id).await?))
}

/// 告警的审计事件
pub async fn list_audit(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Json<Vec<AuditEvent>>> {
    debug!(alert_id = %alert_id, "Listing audit events");

    Ok(Json(state.engine.audit(&alert_id).await?))
}
