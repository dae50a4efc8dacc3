use crate::{handlers, state::AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// 创建 API 路由
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))

        // 租户配置 API
        .route(
            "/api/v1/tenants/:tenant_id/settings",
            get(handlers::get_settings).patch(handlers::update_settings),
        )
        .route("/api/v1/tenants/:tenant_id/settings/versions", get(handlers::list_versions))
        .route("/api/v1/tenants/:tenant_id/settings/rollback/:version", post(handlers::rollback))

        // 样本与告警 API
        .route("/api/v1/tenants/:tenant_id/samples", post(handlers::ingest_sample))
        .route("/api/v1/tenants/:tenant_id/samples/queue", post(handlers::enqueue_samples))
        .route(
            "/api/v1/tenants/:tenant_id/alerts",
            get(handlers::list_alerts).post(handlers::raise_alert),
        )
        .route("/api/v1/alerts/:alert_id", get(handlers::get_alert))
        .route("/api/v1/alerts/:alert_id/acknowledge", post(handlers::acknowledge))
        .route("/api/v1/alerts/:alert_id/dispatches", get(handlers::list_dispatches))
        .route("/api/v1/alerts/:alert_id/audit", get(handlers::list_audit))

        // 接收人与站内消息 API
        .route(
            "/api/v1/tenants/:tenant_id/recipient",
            get(handlers::get_recipient).put(handlers::put_recipient),
        )
        .route(
            "/api/v1/tenants/:tenant_id/inbox",
            get(handlers::get_inbox).delete(handlers::clear_inbox),
        )

        // 添加中间件
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 健康检查
async fn health_check() -> &'static str {
    "OK"
}
