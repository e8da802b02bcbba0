use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::CoreError;
use crate::event::{Event, EventKind};

// Identifiers

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AutomationId(Uuid);

impl AutomationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AutomationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AutomationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AutomationId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CoreError::Validation(format!("invalid automation id: {}", s)))
    }
}

// Automation definition

/// Interaction an automation reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Comment,
    Dm,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Comment => "comment",
            TriggerType::Dm => "dm",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "comment" => Ok(TriggerType::Comment),
            "dm" => Ok(TriggerType::Dm),
            other => Err(CoreError::Validation(format!(
                "unknown trigger type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListenerType {
    #[serde(rename = "MESSAGE")]
    Message,
    #[serde(rename = "SMARTAI")]
    SmartAi,
}

impl ListenerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerType::Message => "MESSAGE",
            ListenerType::SmartAi => "SMARTAI",
        }
    }
}

impl std::str::FromStr for ListenerType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MESSAGE" => Ok(ListenerType::Message),
            "SMARTAI" => Ok(ListenerType::SmartAi),
            other => Err(CoreError::Validation(format!(
                "unknown listener type: {}",
                other
            ))),
        }
    }
}

/// How an automation produces its reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ListenerConfig {
    /// Static template sent verbatim.
    #[serde(rename = "MESSAGE")]
    Message {
        message: String,
        /// Optional text posted publicly under the triggering comment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_reply: Option<String>,
        /// Image delivered after the private reply
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dm_image: Option<String>,
        /// Links rendered as buttons under the private reply
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        dm_links: Vec<DmLink>,
    },
    /// Reply generated by the AI provider.
    #[serde(rename = "SMARTAI")]
    SmartAi {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        prompt: String,
    },
}

/// A titled link attached to a private reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmLink {
    pub title: String,
    pub url: String,
}

impl DmLink {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

impl ListenerConfig {
    pub fn message(text: impl Into<String>) -> Self {
        ListenerConfig::Message {
            message: text.into(),
            public_reply: None,
            dm_image: None,
            dm_links: Vec::new(),
        }
    }

    pub fn smart_ai(prompt: impl Into<String>) -> Self {
        ListenerConfig::SmartAi {
            model: None,
            prompt: prompt.into(),
        }
    }

    pub fn listener_type(&self) -> ListenerType {
        match self {
            ListenerConfig::Message { .. } => ListenerType::Message,
            ListenerConfig::SmartAi { .. } => ListenerType::SmartAi,
        }
    }
}

/// Posts or accounts an automation applies to.
///
/// Serialized as a list of identifiers where `["all"]` stands for every
/// source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum TargetScope {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl TargetScope {
    /// Whether any of the given source identifiers falls in scope.
    pub fn includes<'a>(&self, mut ids: impl Iterator<Item = &'a str>) -> bool {
        match self {
            TargetScope::All => true,
            TargetScope::Only(allowed) => ids.any(|id| allowed.contains(id)),
        }
    }
}

impl From<Vec<String>> for TargetScope {
    fn from(ids: Vec<String>) -> Self {
        let mut allowed = BTreeSet::new();
        for id in ids {
            let id = id.trim();
            if id.eq_ignore_ascii_case("all") {
                return TargetScope::All;
            }
            if !id.is_empty() {
                allowed.insert(id.to_string());
            }
        }
        if allowed.is_empty() {
            TargetScope::All
        } else {
            TargetScope::Only(allowed)
        }
    }
}

impl From<TargetScope> for Vec<String> {
    fn from(scope: TargetScope) -> Self {
        match scope {
            TargetScope::All => vec!["all".to_string()],
            TargetScope::Only(ids) => ids.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationStatus {
    Active,
    Inactive,
    Error,
}

impl AutomationStatus {
    pub fn from_active(active: bool) -> Self {
        if active {
            AutomationStatus::Active
        } else {
            AutomationStatus::Inactive
        }
    }
}

/// A stored rule mapping a keyword trigger to a response action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Automation {
    pub id: AutomationId,
    pub name: String,
    pub trigger_type: TriggerType,
    /// Case-insensitive substrings; an empty list never matches
    pub keywords: Vec<String>,
    pub target_scope: TargetScope,
    pub listener: ListenerConfig,
    pub active: bool,
    pub status: AutomationStatus,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub comment_count: u64,
    pub dm_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Automation {
    /// Create a new active automation with no keywords.
    pub fn new(name: impl Into<String>, trigger_type: TriggerType, listener: ListenerConfig) -> Self {
        let now = Utc::now();
        Self {
            id: AutomationId::new(),
            name: name.into(),
            trigger_type,
            keywords: Vec::new(),
            target_scope: TargetScope::All,
            listener,
            active: true,
            status: AutomationStatus::Active,
            last_triggered_at: None,
            comment_count: 0,
            dm_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords = normalize_keywords(keywords);
        self
    }

    pub fn with_scope(mut self, scope: TargetScope) -> Self {
        self.target_scope = scope;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.set_active(active);
        self
    }

    pub fn listener_type(&self) -> ListenerType {
        self.listener.listener_type()
    }

    /// Toggle the active flag, resetting status to match it.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        self.status = AutomationStatus::from_active(active);
    }

    /// Replace the definition while keeping identity, history and counters.
    pub fn replace_definition(&mut self, definition: Automation) {
        self.name = definition.name;
        self.trigger_type = definition.trigger_type;
        self.keywords = definition.keywords;
        self.target_scope = definition.target_scope;
        self.listener = definition.listener;
        self.set_active(definition.active);
        self.updated_at = Utc::now();
    }

    /// Record a successful send for an event of the given kind.
    pub fn record_sent(&mut self, kind: EventKind, at: DateTime<Utc>) {
        self.last_triggered_at = Some(at);
        match kind {
            EventKind::Comment => self.comment_count += 1,
            EventKind::DirectMessage => self.dm_count += 1,
        }
        if self.active && self.status == AutomationStatus::Error {
            self.status = AutomationStatus::Active;
        }
        self.updated_at = Utc::now();
    }

    pub fn mark_error(&mut self) {
        self.status = AutomationStatus::Error;
        self.updated_at = Utc::now();
    }
}

/// Trim keywords and drop blank entries.
pub fn normalize_keywords<I, S>(keywords: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keywords
        .into_iter()
        .map(|k| k.as_ref().trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

// Dispatch bookkeeping

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchState {
    Pending,
    Sending,
    Sent,
    Failed,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Sent | DispatchState::Failed)
    }
}

/// Outcome record for one `(event, automation)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub id: String,
    pub event_id: String,
    pub automation_id: AutomationId,
    pub event_kind: EventKind,
    pub state: DispatchState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DispatchResult {
    /// Create a pending result for a matched pair.
    pub fn pending(event: &Event, automation_id: AutomationId) -> Self {
        let now = Utc::now();
        Self {
            id: dispatch_id(&event.external_event_id, automation_id),
            event_id: event.external_event_id.clone(),
            automation_id,
            event_kind: event.kind,
            state: DispatchState::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, state: DispatchState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.transition(DispatchState::Failed);
    }
}

/// Deterministic id of a dispatch, also used as outbound idempotency token.
pub fn dispatch_id(external_event_id: &str, automation_id: AutomationId) -> String {
    format!("{}#{}", external_event_id, automation_id)
}

// Dashboard

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub engagement_count: u64,
    pub dm_responses: u64,
    pub comment_responses: u64,
    pub active_automations: u64,
    /// Percent change of sent responses against the previous window
    pub trend: f64,
}
