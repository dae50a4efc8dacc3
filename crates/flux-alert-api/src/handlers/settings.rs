use crate::{error::Result, models::*, state::AppState};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use flux_alert::NotificationSettings;
use tracing::{debug, info};

/// 获取租户配置
pub async fn get_settings(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<NotificationSettings>> {
    debug!(tenant_id = %tenant_id, "Getting notification settings");

    let settings = state.settings.get_settings(&tenant_id).await?;
    Ok(Json(settings))
}

/// 部分更新租户配置
pub async fn update_settings(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<NotificationSettings>> {
    let author = req.author.unwrap_or_else(|| "api".to_string());
    info!(tenant_id = %tenant_id, author = %author, "Updating notification settings");

    let settings = state
        .settings
        .update_settings(
            &tenant_id,
            &req.patch,
            &author,
            req.comment.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(Json(settings))
}

/// 配置版本历史
pub async fn list_versions(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<VersionsQuery>,
) -> Result<Json<Vec<VersionResponse>>> {
    debug!(tenant_id = %tenant_id, section = ?query.section, "Listing settings versions");

    let history = match query.section {
        Some(section) => state.settings.history_touching(&tenant_id, section).await,
        None => state.settings.history(&tenant_id).await,
    };
    let versions = history
        .into_iter()
        .map(VersionResponse::from)
        .collect();
    Ok(Json(versions))
}

/// 回滚到指定版本
pub async fn rollback(
    State(state): State<AppState>,
    Path((tenant_id, version)): Path<(String, u64)>,
    Query(query): Query<RollbackQuery>,
) -> Result<Json<NotificationSettings>> {
    let author = query.author.unwrap_or_else(|| "api".to_string());
    info!(tenant_id = %tenant_id, version = version, author = %author, "Rolling back notification settings");

    let settings = state.settings.rollback(&tenant_id, version, &author).await?;
    Ok(Json(settings))
}
