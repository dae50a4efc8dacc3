use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use flux_alert::{service, AlertEngine, AlertState, EngineConfig, ServiceConfig};
use flux_alert_api::{create_router, AppState};
use flux_alert_config::{MemorySource, SettingsStore};
use flux_notify::{InAppInbox, InAppNotifier, NotifyManager};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn create_test_state() -> AppState {
    let settings = Arc::new(SettingsStore::new(Arc::new(MemorySource::new())));
    let inbox = InAppInbox::new();
    let manager = NotifyManager::default();
    manager.register(Arc::new(InAppNotifier::new(inbox.clone()))).await;
    let engine = Arc::new(AlertEngine::new(
        settings.clone(),
        Arc::new(manager),
        EngineConfig::default(),
    ));

    AppState::new(engine, settings, inbox)
}

async fn create_test_app() -> Router {
    create_router(create_test_state().await)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app().await;

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_get_default_settings() {
    let app = create_test_app().await;

    let (status, body) = call(&app, "GET", "/api/v1/tenants/acme/settings", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["thresholds"]["battery_low"], 20.0);
    assert_eq!(body["frequency"]["mode"], "smart");
    assert_eq!(body["frequency"]["quiet_hours_start"], "22:00");
}

#[tokio::test]
async fn test_update_and_rollback_settings() {
    let app = create_test_app().await;

    let (status, body) = call(
        &app,
        "PATCH",
        "/api/v1/tenants/acme/settings",
        Some(json!({
            "author": "alice",
            "comment": "raise battery threshold",
            "thresholds": { "battery_low": 30.0 }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["thresholds"]["battery_low"], 30.0);

    let (status, versions) = call(&app, "GET", "/api/v1/tenants/acme/settings/versions", None).await;
    assert_eq!(status, StatusCode::OK);
    let versions = versions.as_array().unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0]["author"], "alice");
    assert_eq!(versions[0]["changed"], json!(["thresholds"]));
    let version = versions[0]["version"].as_u64().unwrap();

    call(
        &app,
        "PATCH",
        "/api/v1/tenants/acme/settings",
        Some(json!({ "thresholds": { "battery_low": 45.0 } })),
    )
    .await;
    call(
        &app,
        "PATCH",
        "/api/v1/tenants/acme/settings",
        Some(json!({ "frequency": { "mode": "quiet" } })),
    )
    .await;

    let (status, touching) = call(
        &app,
        "GET",
        "/api/v1/tenants/acme/settings/versions?section=frequency",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let touching = touching.as_array().unwrap();
    assert_eq!(touching.len(), 1);
    assert_eq!(touching[0]["changed"], json!(["frequency"]));

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/v1/tenants/acme/settings/rollback/{}?author=bob", version),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["thresholds"]["battery_low"], 30.0);
}

#[tokio::test]
async fn test_invalid_settings_rejected() {
    let app = create_test_app().await;

    // 低阈值低于极低阈值
    let (status, body) = call(
        &app,
        "PATCH",
        "/api/v1/tenants/acme/settings",
        Some(json!({ "thresholds": { "battery_low": 5.0 } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);

    let (_, settings) = call(&app, "GET", "/api/v1/tenants/acme/settings", None).await;
    assert_eq!(settings["thresholds"]["battery_low"], 20.0);
}

#[tokio::test]
async fn test_rollback_unknown_version() {
    let app = create_test_app().await;

    let (status, _) = call(&app, "POST", "/api/v1/tenants/acme/settings/rollback/42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sample_to_acknowledge_flow() {
    let app = create_test_app().await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/tenants/acme/samples",
        Some(json!({ "device_id": "pump-1", "metric_kind": "battery", "value": 5.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alert"]["priority"], "critical");
    assert_eq!(body["alert"]["state"], "dispatched");
    let alert_id = body["alert"]["id"].as_str().unwrap().to_string();

    let (status, inbox) = call(&app, "GET", "/api/v1/tenants/acme/inbox", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inbox.as_array().unwrap().len(), 1);

    let (status, records) = call(
        &app,
        "GET",
        &format!("/api/v1/alerts/{}/dispatches", alert_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(records
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["channel"] == "in_app" && r["outcome"] == "sent"));

    let (status, alert) = call(
        &app,
        "POST",
        &format!("/api/v1/alerts/{}/acknowledge", alert_id),
        Some(json!({ "who": "operator" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alert["state"], "acknowledged");
    assert_eq!(alert["acknowledged_by"], "operator");

    let (status, listed) = call(
        &app,
        "GET",
        "/api/v1/tenants/acme/alerts?state=acknowledged",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, audit) = call(&app, "GET", &format!("/api/v1/alerts/{}/audit", alert_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!audit.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_sample_below_threshold_produces_no_alert() {
    let app = create_test_app().await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/tenants/acme/samples",
        Some(json!({ "device_id": "pump-1", "metric_kind": "battery", "value": 80.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["alert"].is_null());
}

#[tokio::test]
async fn test_malformed_sample_rejected() {
    let app = create_test_app().await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/tenants/acme/samples",
        Some(json!({ "device_id": " ", "metric_kind": "battery", "value": 5.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_raise_external_alert() {
    let app = create_test_app().await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/tenants/acme/alerts",
        Some(json!({
            "device_id": "door-3",
            "category": "security",
            "priority": "critical",
            "message": "tamper detected"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["alert"]["category"], "security");
}

#[tokio::test]
async fn test_unknown_alert() {
    let app = create_test_app().await;

    let (status, body) = call(&app, "GET", "/api/v1/alerts/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/alerts/missing/acknowledge",
        Some(json!({ "who": "operator" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_register_recipient() {
    let app = create_test_app().await;

    let (status, _) = call(
        &app,
        "PUT",
        "/api/v1/tenants/acme/recipient",
        Some(json!({ "id": "ops-team", "email": "ops@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(&app, "GET", "/api/v1/tenants/acme/recipient", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "ops-team");
    assert_eq!(body["email"], "ops@example.com");
}

#[tokio::test]
async fn test_queued_samples_are_evaluated() {
    let state = create_test_state().await;
    let engine = state.engine.clone();
    let (tasks, samples) = service::start(engine.clone(), ServiceConfig::default());
    let app = create_router(state.with_sample_queue(samples));

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/tenants/acme/samples/queue",
        Some(json!([
            { "device_id": "pump-1", "metric_kind": "battery", "value": 5.0 },
            { "device_id": "pump-2", "metric_kind": "battery", "value": 90.0 }
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["queued"], 2);

    let mut alerts = Vec::new();
    for _ in 0..50 {
        alerts = engine.list_alerts("acme", Some(AlertState::Dispatched)).await;
        if !alerts.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].device_id, "pump-1");

    // 整批校验，一条错误则都不入队
    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/tenants/acme/samples/queue",
        Some(json!([
            { "device_id": "pump-3", "metric_kind": "battery", "value": 5.0 },
            { "device_id": "", "metric_kind": "battery", "value": 5.0 }
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    tasks.shutdown().await;
    assert!(engine.list_alerts("acme", None).await.iter().all(|a| a.device_id != "pump-3"));
}

#[tokio::test]
async fn test_sample_queue_not_running() {
    let app = create_test_app().await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/tenants/acme/samples/queue",
        Some(json!([{ "device_id": "pump-1", "metric_kind": "battery", "value": 5.0 }])),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], 503);
}
