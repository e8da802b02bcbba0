//! HTTP routes for the Instagram webhook

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::gateway::WebhookGateway;

pub const WEBHOOK_PATH: &str = "/api/webhook/instagram";

/// Handshake query parameters
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
}

/// Create Axum router for the webhook endpoint
pub fn create_webhook_router(gateway: Arc<WebhookGateway>) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, get(verify_subscription).post(receive_delivery))
        .with_state(gateway)
}

async fn verify_subscription(
    State(gateway): State<Arc<WebhookGateway>>,
    Query(query): Query<HandshakeQuery>,
) -> impl IntoResponse {
    match gateway.handshake(
        query.mode.as_deref(),
        query.challenge.as_deref(),
        query.verify_token.as_deref(),
    ) {
        Ok(challenge) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            challenge,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn receive_delivery(
    State(gateway): State<Arc<WebhookGateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(gateway.signature_header())
        .and_then(|value| value.to_str().ok());

    match gateway.deliver(&body, signature) {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => e.into_response(),
    }
}
