//! Event normalization
//!
//! Maps platform change items onto canonical [`Event`]s. Normalization is a
//! pure function of the payload and the receive time, so a redelivered item
//! always yields the same `external_event_id`.

use autoreply_core::{Event, EventKind, Platform};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::payload::{Change, Entry, MessagingItem, WebhookPayload};
use crate::{Result, WebhookError};

/// Change fields that carry comments
const COMMENT_FIELDS: &[&str] = &["comments", "live_comments"];
/// Change fields that carry direct messages
const MESSAGE_FIELDS: &[&str] = &["messages", "direct_messages"];

/// Converts webhook payloads into canonical events
#[derive(Debug, Clone, Copy)]
pub struct EventNormalizer {
    platform: Platform,
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self::new(Platform::Instagram)
    }
}

impl EventNormalizer {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Normalize a whole delivery.
    ///
    /// Fails if any recognized item is incomplete, so a delivery is either
    /// accepted entirely or rejected without side effects.
    pub fn normalize(&self, payload: &WebhookPayload, received_at: DateTime<Utc>) -> Result<Vec<Event>> {
        if payload.object != self.platform.as_str() {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        for entry in &payload.entry {
            for change in &entry.changes {
                if let Some(event) = self.normalize_change(entry, change, received_at)? {
                    events.push(event);
                }
            }
            for item in &entry.messaging {
                if let Some(event) = self.normalize_messaging(entry, item, received_at) {
                    events.push(event);
                }
            }
        }
        Ok(events)
    }

    /// Normalize one `changes[]` item. Unrecognized fields yield `None`.
    pub fn normalize_change(
        &self,
        entry: &Entry,
        change: &Change,
        received_at: DateTime<Utc>,
    ) -> Result<Option<Event>> {
        let field = change.field.as_str();
        let kind = if COMMENT_FIELDS.contains(&field) {
            EventKind::Comment
        } else if MESSAGE_FIELDS.contains(&field) {
            EventKind::DirectMessage
        } else {
            return Ok(None);
        };

        let value = &change.value;
        if kind == EventKind::DirectMessage && is_echo(value) {
            return Ok(None);
        }

        let text = match kind {
            EventKind::Comment => string_at(value, &["text"]),
            EventKind::DirectMessage => string_at(value, &["text"])
                .or_else(|| string_at(value, &["message"]))
                .or_else(|| string_at(value, &["message", "text"])),
        }
        .ok_or_else(|| missing(field, "text"))?;

        let author_id = string_at(value, &["from", "id"])
            .or_else(|| string_at(value, &["sender", "id"]))
            .ok_or_else(|| missing(field, "from.id"))?;

        let object_id = match kind {
            EventKind::Comment => first_string(value, &[&["id"], &["comment_id"]]),
            EventKind::DirectMessage => first_string(
                value,
                &[&["message_id"], &["mid"], &["dm_id"], &["id"], &["message", "mid"]],
            ),
        };
        let media_id = first_string(value, &[&["media", "id"], &["media_id"], &["post_id"]]);

        let external_event_id = self.event_key(&entry.id, field, object_id.as_deref(), &author_id, &text);

        let mut event = Event::new(kind, external_event_id, entry.id.clone(), author_id, text)
            .with_received_at(received_at);
        event.platform = self.platform;
        event.object_id = object_id;
        event.media_id = media_id;
        Ok(Some(event))
    }

    /// Normalize one `messaging[]` item. Echoes of the account's own
    /// messages and non-text items (reactions, read receipts) yield `None`.
    pub fn normalize_messaging(
        &self,
        entry: &Entry,
        item: &MessagingItem,
        received_at: DateTime<Utc>,
    ) -> Option<Event> {
        let message = item.message.as_ref()?;
        if message.is_echo {
            return None;
        }
        let text = message.text.clone()?;
        let author_id = item.sender.id.clone();

        let external_event_id = self.event_key(
            &entry.id,
            "messaging",
            message.mid.as_deref(),
            &author_id,
            &text,
        );

        let mut event = Event::new(
            EventKind::DirectMessage,
            external_event_id,
            entry.id.clone(),
            author_id,
            text,
        )
        .with_received_at(received_at);
        event.platform = self.platform;
        event.object_id = message.mid.clone();
        Some(event)
    }

    /// `{platform}:{entry}:{field}:{object}`, falling back to a content hash
    /// when the platform sent no object id.
    fn event_key(
        &self,
        entry_id: &str,
        field: &str,
        object_id: Option<&str>,
        author_id: &str,
        text: &str,
    ) -> String {
        let object = match object_id {
            Some(id) => id.to_string(),
            None => content_hash(author_id, text),
        };
        format!("{}:{}:{}:{}", self.platform, entry_id, field, object)
    }
}

fn content_hash(author_id: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(author_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(text.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("h{}", &digest[..32])
}

fn missing(field: &str, name: &str) -> WebhookError {
    WebhookError::Validation(format!("'{}' change is missing {}", field, name))
}

fn is_echo(value: &Value) -> bool {
    value.get("is_echo").and_then(Value::as_bool).unwrap_or(false)
        || value
            .pointer("/message/is_echo")
            .and_then(Value::as_bool)
            .unwrap_or(false)
}

/// String (or numeric id) at a nested path.
fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_string(value: &Value, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| string_at(value, path))
        .filter(|s| !s.is_empty())
}
