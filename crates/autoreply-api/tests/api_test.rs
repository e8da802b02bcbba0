//! Integration tests for the management API.

use async_trait::async_trait;
use autoreply_api::{create_router, AppState};
use autoreply_core::{Event, EventKind};
use autoreply_engine::{
    AutomationEngine, GenerationError, MessageSender, OutboundMessage, ReplyGenerator,
    ReplyRequest, SendError,
};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct NoopSender;

#[async_trait]
impl MessageSender for NoopSender {
    async fn send(&self, _message: &OutboundMessage) -> Result<(), SendError> {
        Ok(())
    }

    async fn reply_publicly(
        &self,
        _comment_id: &str,
        _text: &str,
        _idempotency_key: &str,
    ) -> Result<(), SendError> {
        Ok(())
    }
}

struct NoopGenerator;

#[async_trait]
impl ReplyGenerator for NoopGenerator {
    async fn generate(&self, _request: &ReplyRequest) -> Result<String, GenerationError> {
        Ok("ok".to_string())
    }
}

fn setup() -> (Router, Arc<AutomationEngine>) {
    let (engine, pool) =
        AutomationEngine::builder(Arc::new(NoopSender), Arc::new(NoopGenerator)).build();
    pool.spawn();
    let engine = Arc::new(engine);
    (create_router(AppState::new(engine.clone())), engine)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn sale_automation() -> Value {
    json!({
        "name": "Spring sale",
        "trigger": { "type": "comment", "keywords": ["sale"], "instagram_posts": ["all"] },
        "listener": { "type": "MESSAGE", "response": { "message": "Check your DMs" } },
        "active": true
    })
}

// ==================== CRUD Tests ====================

#[tokio::test]
async fn test_create_and_get_automation() {
    let (app, _) = setup();

    let (status, created) = call(&app, "POST", "/api/automations", Some(sale_automation())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "Spring sale");
    assert_eq!(created["status"], "active");
    assert_eq!(created["trigger"]["keywords"], json!(["sale"]));
    assert_eq!(created["dmCount"], 0);

    let id = created["id"].as_str().unwrap().to_string();
    let (status, fetched) = call(&app, "GET", &format!("/api/automations/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], created["id"]);
    assert_eq!(fetched["listener"]["response"]["message"], "Check your DMs");
}

#[tokio::test]
async fn test_create_rejects_invalid_bodies() {
    let (app, engine) = setup();

    let mut missing_type = sale_automation();
    missing_type["trigger"] = json!({});
    let (status, body) = call(&app, "POST", "/api/automations", Some(missing_type)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let mut missing_listener = sale_automation();
    missing_listener["listener"] = json!({ "response": { "message": "x" } });
    let (status, _) = call(&app, "POST", "/api/automations", Some(missing_listener)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "POST", "/api/automations", Some(json!("not an object"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(engine.repository().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_is_ordered_by_creation() {
    let (app, _) = setup();
    for name in ["first", "second", "third"] {
        let mut body = sale_automation();
        body["name"] = json!(name);
        call(&app, "POST", "/api/automations", Some(body)).await;
    }

    let (status, list) = call(&app, "GET", "/api/automations", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_update_replaces_definition() {
    let (app, engine) = setup();
    let (_, created) = call(&app, "POST", "/api/automations", Some(sale_automation())).await;
    let id = created["id"].as_str().unwrap().to_string();

    let update = json!({
        "name": "Assistant",
        "trigger": { "type": "dm", "keywords": ["price"] },
        "listener": { "type": "SMARTAI", "config": { "model": "gpt-4o-mini", "prompt": "You sell shoes" } },
        "active": false
    });
    let (status, updated) = call(&app, "PUT", &format!("/api/automations/{}", id), Some(update)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["id"], created["id"]);
    assert_eq!(updated["createdAt"], created["createdAt"]);
    assert_eq!(updated["trigger"]["type"], "dm");
    assert_eq!(updated["listener"]["type"], "SMARTAI");
    assert_eq!(updated["listener"]["config"]["model"], "gpt-4o-mini");
    assert_eq!(updated["status"], "inactive");

    assert_eq!(engine.repository().active_count(), 0);

    let (status, _) = call(
        &app,
        "PUT",
        "/api/automations/00000000-0000-0000-0000-000000000000",
        Some(sale_automation()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_automation() {
    let (app, engine) = setup();
    let (_, created) = call(&app, "POST", "/api/automations", Some(sale_automation())).await;
    let uri = format!("/api/automations/{}", created["id"].as_str().unwrap());
    assert_eq!(engine.repository().active_count(), 1);

    let (status, _) = call(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(engine.repository().active_count(), 0);

    let (status, _) = call(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "GET", "/api/automations/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ==================== Dashboard Tests ====================

#[tokio::test]
async fn test_dashboard_metrics() {
    let (app, engine) = setup();
    call(&app, "POST", "/api/automations", Some(sale_automation())).await;

    engine.route(Arc::new(Event::new(
        EventKind::Comment,
        "instagram:page:comments:c1",
        "page",
        "user",
        "nothing to see",
    )));

    let (status, metrics) = call(&app, "GET", "/api/dashboard/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["engagementCount"], 1);
    assert_eq!(metrics["activeAutomations"], 1);
    assert_eq!(metrics["dmResponses"], 0);
    assert_eq!(metrics["trend"], 0.0);
}

#[tokio::test]
async fn test_dashboard_automations() {
    let (app, _) = setup();
    call(&app, "POST", "/api/automations", Some(sale_automation())).await;

    let (status, list) = call(&app, "GET", "/api/dashboard/automations", None).await;
    assert_eq!(status, StatusCode::OK);
    let row = &list[0];
    assert_eq!(row["name"], "Spring sale");
    assert_eq!(row["status"], "active");
    assert_eq!(row["triggerType"], "comment");
    assert_eq!(row["listenerType"], "MESSAGE");
    assert_eq!(row["keywords"], json!(["sale"]));
}

#[tokio::test]
async fn test_dashboard_dispatches() {
    let (app, engine) = setup();
    call(&app, "POST", "/api/automations", Some(sale_automation())).await;

    for i in 0..3 {
        engine.route(Arc::new(Event::new(
            EventKind::Comment,
            format!("instagram:page:comments:c{}", i),
            "page",
            "user",
            "sale!",
        )));
    }

    let (status, all) = call(&app, "GET", "/api/dashboard/dispatches", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 3);

    let (_, limited) = call(&app, "GET", "/api/dashboard/dispatches?limit=2", None).await;
    assert_eq!(limited.as_array().unwrap().len(), 2);

    let (status, _) = call(&app, "GET", "/api/dashboard/dispatches?limit=abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
