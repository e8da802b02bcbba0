//! Platform webhook body.
//!
//! Only the envelope is typed. `changes[].value` stays untyped because its
//! shape depends on the field, and unknown fields must still parse.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{Result, WebhookError};

/// Top-level delivery body
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    pub entry: Vec<Entry>,
}

impl WebhookPayload {
    /// Parse a raw body; a missing `object` or `entry` is a validation error.
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| WebhookError::Validation(e.to_string()))
    }
}

/// One account's batch of changes
#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub changes: Vec<Change>,
    #[serde(default)]
    pub messaging: Vec<MessagingItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Change {
    pub field: String,
    #[serde(default)]
    pub value: Value,
}

/// Messenger-style direct message item
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingItem {
    pub sender: Participant,
    #[serde(default)]
    pub recipient: Option<Participant>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub message: Option<MessagingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Participant {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagingMessage {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub is_echo: bool,
}

/// Platform ids arrive as strings, but numeric ids show up in test traffic.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_changes() {
        let body = br#"{
            "object": "instagram",
            "entry": [{
                "id": 17841400000000000,
                "time": 1700000000,
                "changes": [{"field": "comments", "value": {"text": "hi"}}]
            }]
        }"#;

        let payload = WebhookPayload::parse(body).unwrap();
        assert_eq!(payload.object, "instagram");
        assert_eq!(payload.entry[0].id, "17841400000000000");
        assert_eq!(payload.entry[0].changes[0].field, "comments");
        assert!(payload.entry[0].messaging.is_empty());
    }

    #[test]
    fn test_parse_messaging() {
        let body = br#"{
            "object": "instagram",
            "entry": [{
                "id": "page",
                "messaging": [{
                    "sender": {"id": "user"},
                    "recipient": {"id": "page"},
                    "message": {"mid": "m1", "text": "hello", "is_echo": true}
                }]
            }]
        }"#;

        let payload = WebhookPayload::parse(body).unwrap();
        let message = payload.entry[0].messaging[0].message.as_ref().unwrap();
        assert_eq!(message.mid.as_deref(), Some("m1"));
        assert!(message.is_echo);
    }

    #[test]
    fn test_missing_discriminator_is_rejected() {
        assert!(WebhookPayload::parse(br#"{"entry": []}"#).is_err());
        assert!(WebhookPayload::parse(br#"{"object": "instagram"}"#).is_err());
        assert!(WebhookPayload::parse(br#"{"invalid": "data"}"#).is_err());
        assert!(WebhookPayload::parse(b"not a json").is_err());
    }
}
