//! Canonical inbound event produced by the webhook normalizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TriggerType;

/// Social platform an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of inbound interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Comment,
    DirectMessage,
}

impl EventKind {
    /// Trigger type of the automations that may react to this kind.
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            EventKind::Comment => TriggerType::Comment,
            EventKind::DirectMessage => TriggerType::Dm,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Comment => "comment",
            EventKind::DirectMessage => "direct_message",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a reply to an event has to be addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    /// Private reply to a comment, addressed by comment id.
    Comment { comment_id: String },
    /// Direct message to a user.
    User { user_id: String },
}

/// One normalized occurrence derived from a webhook change item.
///
/// Events are immutable once built and are never persisted past the
/// deduplication window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub platform: Platform,
    pub kind: EventKind,
    /// Deduplication key derived from platform identifiers
    pub external_event_id: String,
    /// Account (page / business profile) the webhook entry belongs to
    pub source_account_id: String,
    pub author_id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
    /// Comment id or message id, when the platform supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    /// Post the comment was left on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
}

impl Event {
    /// Create a new event received now.
    pub fn new(
        kind: EventKind,
        external_event_id: impl Into<String>,
        source_account_id: impl Into<String>,
        author_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            platform: Platform::Instagram,
            kind,
            external_event_id: external_event_id.into(),
            source_account_id: source_account_id.into(),
            author_id: author_id.into(),
            text: text.into(),
            received_at: Utc::now(),
            object_id: None,
            media_id: None,
        }
    }

    pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    pub fn with_media_id(mut self, media_id: impl Into<String>) -> Self {
        self.media_id = Some(media_id.into());
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Identifiers a target scope is checked against.
    pub fn scope_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.source_account_id.as_str()).chain(self.media_id.as_deref())
    }

    /// Address for the automated reply.
    ///
    /// Comments without a comment id fall back to messaging the author.
    pub fn reply_target(&self) -> ReplyTarget {
        match (self.kind, &self.object_id) {
            (EventKind::Comment, Some(comment_id)) => ReplyTarget::Comment {
                comment_id: comment_id.clone(),
            },
            _ => ReplyTarget::User {
                user_id: self.author_id.clone(),
            },
        }
    }
}
