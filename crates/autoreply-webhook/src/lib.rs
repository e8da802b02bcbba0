//! Instagram webhook gateway for Autoreply
//!
//! This crate receives platform webhooks and feeds the automation engine:
//! - Subscription handshake (`hub.challenge` echo)
//! - HMAC-SHA256 payload signature verification
//! - Normalization of `changes` and `messaging` items into canonical events
//! - Idempotent deduplication of platform redeliveries
//!
//! Dispatch itself runs on the engine's worker pool; the gateway only
//! enqueues, so acknowledgments never wait on outbound calls.

pub mod gateway;
pub mod idempotency;
pub mod normalizer;
pub mod payload;
pub mod routes;
pub mod signature;

pub use gateway::{DeliveryReport, DeliveryStatus, WebhookGateway};
pub use idempotency::{IdempotencyStore, MarkOutcome};
pub use normalizer::EventNormalizer;
pub use payload::WebhookPayload;
pub use routes::create_webhook_router;
pub use signature::SignatureVerifier;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Webhook errors
#[derive(Error, Debug)]
pub enum WebhookError {
    /// Payload signature missing or wrong
    #[error("Signature verification failed: {0}")]
    InvalidSignature(String),

    /// Handshake verify token mismatch or unsupported mode
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Malformed body or incomplete recognized change
    #[error("Invalid payload: {0}")]
    Validation(String),
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            WebhookError::VerificationFailed(_) => StatusCode::FORBIDDEN,
            WebhookError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            WebhookError::InvalidSignature(_) | WebhookError::VerificationFailed(_) => "auth_error",
            WebhookError::Validation(_) => "validation_error",
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.error_code(),
            "message": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebhookError>;
