//! Webhook gateway
//!
//! Orchestrates one delivery: signature, parse, normalize, deduplicate and
//! route. Everything here is synchronous and cheap; dispatch happens on the
//! engine's workers after the acknowledgment is returned.

use autoreply_core::{Event, WebhookConfig};
use autoreply_engine::{AutomationEngine, RouteOutcome};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::idempotency::{IdempotencyStore, MarkOutcome};
use crate::normalizer::EventNormalizer;
use crate::payload::WebhookPayload;
use crate::signature::{constant_time_eq, SignatureVerifier};
use crate::{Result, WebhookError};

const SUBSCRIBE_MODE: &str = "subscribe";

/// Overall outcome of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Processed,
    Duplicate,
    Ignored,
}

/// Acknowledgment body for a delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub status: DeliveryStatus,
    /// Recognized events in the body
    pub events: usize,
    /// Pairs handed to the dispatch queue
    pub dispatched: usize,
    /// Events already seen
    pub duplicates: usize,
    /// Pairs refused by a full queue
    pub rejected: usize,
}

/// Entry point for platform webhooks
pub struct WebhookGateway {
    engine: Arc<AutomationEngine>,
    idempotency: Arc<IdempotencyStore>,
    normalizer: EventNormalizer,
    verifier: Option<SignatureVerifier>,
    verify_token: String,
    signature_header: String,
}

impl WebhookGateway {
    pub fn new(
        engine: Arc<AutomationEngine>,
        idempotency: Arc<IdempotencyStore>,
        config: &WebhookConfig,
    ) -> Self {
        let verifier = if config.signature_required() {
            Some(SignatureVerifier::new(&config.app_secret))
        } else {
            None
        };

        Self {
            engine,
            idempotency,
            normalizer: EventNormalizer::default(),
            verifier,
            verify_token: config.verify_token.clone(),
            signature_header: config.signature_header.clone(),
        }
    }

    pub fn engine(&self) -> &Arc<AutomationEngine> {
        &self.engine
    }

    pub fn idempotency(&self) -> &Arc<IdempotencyStore> {
        &self.idempotency
    }

    /// Header carrying the payload signature
    pub fn signature_header(&self) -> &str {
        &self.signature_header
    }

    /// Answer the subscription handshake with the challenge
    pub fn handshake(
        &self,
        mode: Option<&str>,
        challenge: Option<&str>,
        token: Option<&str>,
    ) -> Result<String> {
        let (mode, challenge, token) = match (mode, challenge, token) {
            (Some(mode), Some(challenge), Some(token)) => (mode, challenge, token),
            _ => {
                return Err(WebhookError::Validation(
                    "hub.mode, hub.challenge and hub.verify_token are required".to_string(),
                ))
            }
        };

        if mode != SUBSCRIBE_MODE {
            warn!(mode, "Rejected handshake with unsupported mode");
            return Err(WebhookError::VerificationFailed(format!(
                "Unsupported mode '{}'",
                mode
            )));
        }
        if self.verify_token.is_empty() || !constant_time_eq(token, &self.verify_token) {
            warn!("Rejected handshake with wrong verify token");
            return Err(WebhookError::VerificationFailed(
                "Verify token mismatch".to_string(),
            ));
        }

        info!("Webhook subscription verified");
        Ok(challenge.to_string())
    }

    /// Process one delivery body.
    ///
    /// The whole body is normalized before any event is marked, so a
    /// rejected delivery leaves no trace.
    pub fn deliver(&self, body: &[u8], signature: Option<&str>) -> Result<DeliveryReport> {
        if let Some(verifier) = &self.verifier {
            verifier.verify(body, signature).map_err(|e| {
                warn!(error = %e, "Rejected delivery with bad signature");
                e
            })?;
        }

        let payload = WebhookPayload::parse(body)?;
        let events = self.normalizer.normalize(&payload, Utc::now())?;

        let mut report = DeliveryReport {
            status: DeliveryStatus::Ignored,
            events: events.len(),
            dispatched: 0,
            duplicates: 0,
            rejected: 0,
        };
        let mut matched = false;
        let mut duplicate_matches = false;

        for event in events {
            match self.idempotency.check_and_mark(&event.external_event_id) {
                MarkOutcome::FirstSeen => {
                    let event = Arc::new(event);
                    match self.engine.route(event.clone()) {
                        RouteOutcome::Ignored => {}
                        RouteOutcome::Matched {
                            dispatched,
                            rejected,
                        } => {
                            if dispatched + rejected > 0 {
                                matched = true;
                                report.dispatched += dispatched;
                                report.rejected += rejected;
                            } else {
                                // every pair already registered by an earlier delivery
                                report.duplicates += 1;
                                duplicate_matches = true;
                            }
                        }
                    }
                }
                MarkOutcome::Duplicate => {
                    report.duplicates += 1;
                    duplicate_matches |= self.is_live_duplicate(&event);
                }
            }
        }

        report.status = if matched {
            DeliveryStatus::Processed
        } else if duplicate_matches {
            DeliveryStatus::Duplicate
        } else {
            DeliveryStatus::Ignored
        };

        debug!(
            status = ?report.status,
            events = report.events,
            dispatched = report.dispatched,
            duplicates = report.duplicates,
            rejected = report.rejected,
            "Delivery acknowledged"
        );
        Ok(report)
    }

    fn is_live_duplicate(&self, event: &Event) -> bool {
        let live = self.engine.has_matches(event);
        debug!(event_id = %event.external_event_id, live, "Duplicate event");
        live
    }
}
