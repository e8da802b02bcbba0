//! Integration tests for the webhook pipeline, from HTTP request to outbound reply.

use async_trait::async_trait;
use autoreply_core::{Automation, DispatchState, ListenerConfig, TriggerType, WebhookConfig};
use autoreply_engine::{
    AutomationEngine, GenerationError, MessageSender, OutboundMessage, ReplyGenerator,
    ReplyRequest, SendError,
};
use autoreply_webhook::{create_webhook_router, IdempotencyStore, SignatureVerifier, WebhookGateway};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSender {
    fn count(&self) -> usize {
        self.sent.lock().len()
    }

    fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|m| m.text.clone()).collect()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        self.sent.lock().push(message.clone());
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

struct FixedGenerator;

#[async_trait]
impl ReplyGenerator for FixedGenerator {
    async fn generate(&self, _request: &ReplyRequest) -> Result<String, GenerationError> {
        Ok("Generated reply".to_string())
    }
}

struct Harness {
    app: Router,
    engine: Arc<AutomationEngine>,
    sender: Arc<RecordingSender>,
}

fn harness(config: WebhookConfig) -> Harness {
    let sender = Arc::new(RecordingSender::default());
    let (engine, pool) = AutomationEngine::builder(sender.clone(), Arc::new(FixedGenerator)).build();
    pool.spawn();

    let engine = Arc::new(engine);
    let gateway = Arc::new(WebhookGateway::new(
        engine.clone(),
        Arc::new(IdempotencyStore::new(config.idempotency_ttl())),
        &config,
    ));

    Harness {
        app: create_webhook_router(gateway),
        engine,
        sender,
    }
}

fn default_harness() -> Harness {
    harness(WebhookConfig::new("verify-me".into(), String::new()))
}

async fn post(app: &Router, body: Value) -> (StatusCode, Value) {
    post_raw(app, body.to_string(), None).await
}

async fn post_raw(app: &Router, body: String, signature: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri("/api/webhook/instagram")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        request = request.header("X-Hub-Signature-256", signature);
    }

    let response = app
        .clone()
        .oneshot(request.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn comment_body(comment_id: &str, text: &str) -> Value {
    json!({
        "object": "instagram",
        "entry": [{
            "id": "page-1",
            "time": 1700000000,
            "changes": [{
                "field": "comments",
                "value": {
                    "id": comment_id,
                    "text": text,
                    "from": { "id": "user-1", "username": "buyer" },
                    "media": { "id": "media-1" }
                }
            }]
        }]
    })
}

fn dm_body(dm_id: &str, text: &str) -> Value {
    json!({
        "object": "instagram",
        "entry": [{
            "id": "page-1",
            "changes": [{
                "field": "direct_messages",
                "value": {
                    "dm_id": dm_id,
                    "message": text,
                    "from": { "id": "user-2" }
                }
            }]
        }]
    })
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn create(engine: &AutomationEngine, automation: Automation) -> Automation {
    engine.repository().create(automation).await.unwrap()
}

// ==================== Delivery Tests ====================

#[tokio::test]
async fn test_matching_comment_is_answered() {
    let h = default_harness();
    let automation = create(
        &h.engine,
        Automation::new("Sale", TriggerType::Comment, ListenerConfig::message("Check your DMs"))
            .with_keywords(["sale"]),
    )
    .await;

    let (status, body) = post(&h.app, comment_body("c-1", "Big SALE today?")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");
    assert_eq!(body["events"], 1);
    assert_eq!(body["dispatched"], 1);

    wait_for(|| h.sender.count() == 1).await;
    assert_eq!(h.sender.texts(), vec!["Check your DMs".to_string()]);

    let engine = h.engine.clone();
    wait_for(|| engine.metrics().snapshot().comment_responses == 1).await;
    let metrics = h.engine.metrics().snapshot();
    assert_eq!(metrics.engagement_count, 1);
    assert_eq!(metrics.dm_responses, 0);
    assert_eq!(metrics.active_automations, 1);

    let mut stored = None;
    for _ in 0..200 {
        let current = h.engine.repository().get(automation.id).await.unwrap().unwrap();
        if current.comment_count == 1 {
            stored = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stored = stored.expect("automation counters not updated");
    assert!(stored.last_triggered_at.is_some());
}

#[tokio::test]
async fn test_redelivery_is_not_dispatched_twice() {
    let h = default_harness();
    create(
        &h.engine,
        Automation::new("Sale", TriggerType::Comment, ListenerConfig::message("Hi"))
            .with_keywords(["sale"]),
    )
    .await;

    let (_, first) = post(&h.app, comment_body("c-1", "sale")).await;
    assert_eq!(first["status"], "processed");

    let (status, second) = post(&h.app, comment_body("c-1", "sale")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "duplicate");
    assert_eq!(second["duplicates"], 1);
    assert_eq!(second["dispatched"], 0);

    wait_for(|| h.sender.count() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.sender.count(), 1);
    assert_eq!(h.engine.metrics().snapshot().engagement_count, 1);
}

#[tokio::test]
async fn test_unmatched_comment_is_ignored() {
    let h = default_harness();
    create(
        &h.engine,
        Automation::new("Sale", TriggerType::Comment, ListenerConfig::message("Hi"))
            .with_keywords(["sale"]),
    )
    .await;

    let (status, body) = post(&h.app, comment_body("c-1", "nice photo")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert_eq!(h.engine.metrics().snapshot().engagement_count, 1);
}

#[tokio::test]
async fn test_unknown_field_is_accepted_and_ignored() {
    let h = default_harness();
    let body = json!({
        "object": "instagram",
        "entry": [{ "id": "page-1", "changes": [{ "field": "unknown_field", "value": {} }] }]
    });

    let (status, body) = post(&h.app, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert_eq!(body["events"], 0);
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let h = default_harness();

    let (status, body) = post(&h.app, json!({ "invalid": "data" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = post_raw(&h.app, "not json".to_string(), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(h.engine.metrics().snapshot().engagement_count, 0);
}

#[tokio::test]
async fn test_cleared_keywords_stop_matching() {
    let h = default_harness();
    let automation = create(
        &h.engine,
        Automation::new("Greeter", TriggerType::Dm, ListenerConfig::message("Welcome!"))
            .with_keywords(["hello"]),
    )
    .await;

    let (_, first) = post(&h.app, dm_body("dm1", "Hello there")).await;
    assert_eq!(first["status"], "processed");
    wait_for(|| h.sender.count() == 1).await;

    let definition = Automation::new("Greeter", TriggerType::Dm, ListenerConfig::message("Welcome!"))
        .with_keywords(Vec::<String>::new());
    h.engine
        .repository()
        .replace(automation.id, definition)
        .await
        .unwrap();

    let (status, again) = post(&h.app, dm_body("dm1", "Hello there")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["status"], "ignored");

    let (_, fresh) = post(&h.app, dm_body("dm2", "Hello again")).await;
    assert_eq!(fresh["status"], "ignored");
    assert_eq!(h.sender.count(), 1);
}

#[tokio::test]
async fn test_smart_ai_direct_message() {
    let h = default_harness();
    create(
        &h.engine,
        Automation::new("Assistant", TriggerType::Dm, ListenerConfig::smart_ai("You sell shoes"))
            .with_keywords(["price"]),
    )
    .await;

    let (_, body) = post(&h.app, dm_body("dm1", "What's the price?")).await;
    assert_eq!(body["status"], "processed");

    wait_for(|| h.sender.count() == 1).await;
    assert_eq!(h.sender.texts(), vec!["Generated reply".to_string()]);
    let engine = h.engine.clone();
    wait_for(|| engine.metrics().snapshot().dm_responses == 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deliveries() {
    let h = default_harness();
    let mut automations = Vec::new();
    for i in 0..10 {
        let keyword = format!("promo{}", i);
        automations.push(
            create(
                &h.engine,
                Automation::new(
                    format!("Promo {}", i),
                    TriggerType::Comment,
                    ListenerConfig::message(format!("Code {}", i)),
                )
                .with_keywords([keyword]),
            )
            .await,
        );
    }

    let mut handles = Vec::new();
    for i in 0..10 {
        let app = h.app.clone();
        handles.push(tokio::spawn(async move {
            post(&app, comment_body(&format!("c-{}", i), &format!("promo{} please", i))).await
        }));
    }
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "processed");
    }

    let engine = h.engine.clone();
    wait_for(|| {
        engine
            .dispatcher()
            .recent(100)
            .iter()
            .filter(|r| r.state == DispatchState::Sent)
            .count()
            == 10
    })
    .await;

    let results = h.engine.dispatcher().recent(100);
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|r| r.state == DispatchState::Sent));

    for automation in &automations {
        let mut stored = None;
        for _ in 0..200 {
            let current = h.engine.repository().get(automation.id).await.unwrap().unwrap();
            if current.comment_count == 1 {
                stored = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stored = stored.unwrap_or_else(|| panic!("{} was not counted once", automation.name));
        assert_eq!(stored.comment_count, 1);
        assert_eq!(stored.dm_count, 0);
    }

    let mut texts = h.sender.texts();
    texts.sort();
    let mut expected: Vec<String> = (0..10).map(|i| format!("Code {}", i)).collect();
    expected.sort();
    assert_eq!(texts, expected);

    wait_for(|| engine.metrics().snapshot().comment_responses == 10).await;
    assert_eq!(h.engine.metrics().snapshot().engagement_count, 10);
}

// ==================== Signature Tests ====================

#[tokio::test]
async fn test_signature_required_when_secret_configured() {
    let h = harness(WebhookConfig::new("verify-me".into(), "app-secret".into()));
    let body = comment_body("c-1", "sale").to_string();

    let (status, response) = post_raw(&h.app, body.clone(), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["error"], "auth_error");

    let wrong = SignatureVerifier::new("other-secret").sign(body.as_bytes()).unwrap();
    let (status, _) = post_raw(&h.app, body.clone(), Some(&wrong)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let right = SignatureVerifier::new("app-secret").sign(body.as_bytes()).unwrap();
    let (status, response) = post_raw(&h.app, body, Some(&right)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "ignored");
}

// ==================== Handshake Tests ====================

#[tokio::test]
async fn test_subscription_handshake() {
    let h = default_harness();

    let (status, body) = get(
        &h.app,
        "/api/webhook/instagram?hub.mode=subscribe&hub.challenge=1158201444&hub.verify_token=verify-me",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "1158201444");

    let (status, _) = get(
        &h.app,
        "/api/webhook/instagram?hub.mode=subscribe&hub.challenge=1&hub.verify_token=wrong",
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = get(&h.app, "/api/webhook/instagram?hub.mode=subscribe").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
