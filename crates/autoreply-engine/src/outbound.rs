//! Outbound replies to the social platform
//!
//! Sends private replies and direct messages through the Graph API and
//! classifies failures so the dispatcher knows which ones are safe to retry.

use async_trait::async_trait;
use autoreply_core::{DmLink, PlatformConfig, ReplyTarget};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

/// Header carrying the dispatch id on outbound calls
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Graph error codes that signal throttling or a temporary outage
const TRANSIENT_GRAPH_CODES: &[i64] = &[1, 2, 4, 17, 32, 341, 613];

/// Outbound send failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SendError {
    /// The request did not take effect and may be retried
    #[error("Transient send failure: {0}")]
    Transient(String),

    /// The platform rejected the request; retrying cannot help
    #[error("Permanent send failure: {0}")]
    Permanent(String),

    /// The request may have been delivered; retrying risks a duplicate
    #[error("Send outcome unknown: {0}")]
    OutcomeUnknown(String),
}

/// A reply ready to be delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub target: ReplyTarget,
    pub text: String,
    /// Dispatch id, stable across attempts
    pub idempotency_key: String,
    /// Image sent as a follow-up once the text is delivered
    pub image_url: Option<String>,
    /// Rendered as URL buttons under the text
    pub links: Vec<DmLink>,
}

impl OutboundMessage {
    pub fn new(
        target: ReplyTarget,
        text: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            target,
            text: text.into(),
            idempotency_key: idempotency_key.into(),
            image_url: None,
            links: Vec::new(),
        }
    }

    pub fn with_image(mut self, url: Option<String>) -> Self {
        self.image_url = url;
        self
    }

    pub fn with_links(mut self, links: Vec<DmLink>) -> Self {
        self.links = links;
        self
    }

    /// Graph `message` object: plain text, or a button template when
    /// links are attached.
    fn message_body(&self) -> serde_json::Value {
        if self.links.is_empty() {
            return json!({ "text": self.text });
        }

        let buttons: Vec<serde_json::Value> = self
            .links
            .iter()
            .map(|link| json!({ "type": "web_url", "url": link.url, "title": link.title }))
            .collect();
        json!({
            "attachment": {
                "type": "template",
                "payload": {
                    "template_type": "button",
                    "text": self.text,
                    "buttons": buttons,
                }
            }
        })
    }
}

/// Delivery channel for automated replies
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send a private reply or direct message, with its attachments.
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError>;

    /// Post a public reply under a comment.
    async fn reply_publicly(
        &self,
        comment_id: &str,
        text: &str,
        idempotency_key: &str,
    ) -> Result<(), SendError>;
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// Graph API client for Instagram messaging
pub struct GraphApiSender {
    client: Client,
    base_url: String,
    page_id: String,
    access_token: String,
}

impl GraphApiSender {
    /// Create a new sender from platform configuration
    pub fn new(config: &PlatformConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent("Autoreply/1.0")
            .build()?;

        Ok(Self {
            client,
            base_url: config.graph_base_url.trim_end_matches('/').to_string(),
            page_id: config.page_id.clone(),
            access_token: config.page_access_token.clone(),
        })
    }

    fn messages_url(&self) -> String {
        let page = if self.page_id.is_empty() {
            "me"
        } else {
            self.page_id.as_str()
        };
        format!("{}/{}/messages", self.base_url, page)
    }

    async fn post(
        &self,
        url: &str,
        body: serde_json::Value,
        idempotency_key: &str,
    ) -> Result<(), SendError> {
        debug!(url = %url, idempotency_key = %idempotency_key, "Sending Graph API request");

        let result = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(());
                }
                let text = response.text().await.unwrap_or_default();
                let error = classify_response(status, &text);
                warn!(url = %url, status = %status, error = %error, "Graph API request rejected");
                Err(error)
            }
            Err(e) => Err(classify_transport_error(&e)),
        }
    }
}

#[async_trait]
impl MessageSender for GraphApiSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        let recipient = match &message.target {
            ReplyTarget::Comment { comment_id } => json!({ "comment_id": comment_id }),
            ReplyTarget::User { user_id } => json!({ "id": user_id }),
        };
        let body = json!({
            "recipient": recipient,
            "message": message.message_body(),
        });
        self.post(&self.messages_url(), body, &message.idempotency_key)
            .await?;

        // The reply already landed, so a failed image must not fail the send
        if let Some(url) = &message.image_url {
            let body = json!({
                "recipient": recipient,
                "message": {
                    "attachment": {
                        "type": "image",
                        "payload": { "url": url, "is_reusable": false }
                    }
                },
            });
            let key = format!("{}#image", message.idempotency_key);
            if let Err(e) = self.post(&self.messages_url(), body, &key).await {
                warn!(
                    idempotency_key = %message.idempotency_key,
                    error = %e,
                    "Image attachment failed"
                );
            }
        }
        Ok(())
    }

    async fn reply_publicly(
        &self,
        comment_id: &str,
        text: &str,
        idempotency_key: &str,
    ) -> Result<(), SendError> {
        let url = format!("{}/{}/replies", self.base_url, comment_id);
        self.post(&url, json!({ "message": text }), idempotency_key)
            .await
    }
}

/// Map a non-success Graph API response onto a send error.
fn classify_response(status: StatusCode, body: &str) -> SendError {
    let graph_error = serde_json::from_str::<GraphErrorBody>(body).ok().map(|b| b.error);
    let code = graph_error.as_ref().and_then(|e| e.code);
    let detail = match &graph_error {
        Some(GraphError {
            code: Some(code),
            message,
        }) => format!(
            "{} (code {}): {}",
            status,
            code,
            message.as_deref().unwrap_or("no message")
        ),
        _ => format!("{}", status),
    };

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return SendError::Transient(detail);
    }
    match code {
        Some(code) if TRANSIENT_GRAPH_CODES.contains(&code) => SendError::Transient(detail),
        _ => SendError::Permanent(detail),
    }
}

/// Requests that never reached the platform can be retried; anything that
/// failed after the request was written has an unknown outcome.
fn classify_transport_error(error: &reqwest::Error) -> SendError {
    if error.is_connect() {
        SendError::Transient(error.to_string())
    } else if error.is_builder() {
        SendError::Permanent(error.to_string())
    } else {
        SendError::OutcomeUnknown(error.to_string())
    }
}
