use crate::{error::Result, state::AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use flux_notify::{NotifyMessage, Recipient};
use tracing::{debug, info};

/// 站内消息
pub async fn get_inbox(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Vec<NotifyMessage>>> {
    debug!(tenant_id = %tenant_id, "Reading inbox");

    let recipient = state.engine.recipient(&tenant_id);
    Ok(Json(state.inbox.messages(&recipient.id).await))
}

/// 清空站内消息
pub async fn clear_inbox(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let recipient = state.engine.recipient(&tenant_id);
    let cleared = state.inbox.clear(&recipient.id).await;
    info!(tenant_id = %tenant_id, cleared = cleared, "Inbox cleared");

    Ok(Json(serde_json::json!({ "cleared": cleared })))
}

/// 获取租户联系方式
pub async fn get_recipient(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Recipient>> {
    Ok(Json(state.engine.recipient(&tenant_id)))
}

/// 登记租户联系方式
pub async fn put_recipient(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(recipient): Json<Recipient>,
) -> Result<StatusCode> {
    info!(tenant_id = %tenant_id, recipient = %recipient.id, "Registering recipient");

    if recipient.id.trim().is_empty() {
        return Err(crate::error::ApiError::BadRequest("recipient id is empty".to_string()));
    }
    state.engine.register_recipient(tenant_id, recipient);
    Ok(StatusCode::NO_CONTENT)
}
