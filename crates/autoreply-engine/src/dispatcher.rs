//! Response dispatch
//!
//! Runs the `pending -> sending -> sent | failed` state machine for one
//! `(event, automation)` pair. Only failures known not to have reached the
//! platform are retried; a send whose outcome is unknown is never repeated.

use autoreply_core::{
    dispatch_id, AiConfig, Automation, AutomationId, DispatchConfig, DispatchResult,
    DispatchState, Event, EventKind, ListenerConfig, ReplyTarget,
};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::history::ConversationLog;
use crate::metrics::MetricsAggregator;
use crate::outbound::{MessageSender, OutboundMessage, SendError};
use crate::reply::{GenerationError, ReplyGenerator, ReplyRequest};
use crate::repository::AutomationRepository;
use crate::retry::RetryPolicy;

/// Failure of a single dispatch attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),

    #[error("{0}")]
    OutcomeUnknown(String),

    #[error("{0}")]
    Cancelled(String),
}

impl From<SendError> for DispatchError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Transient(_) => DispatchError::Transient(err.to_string()),
            SendError::Permanent(_) => DispatchError::Permanent(err.to_string()),
            SendError::OutcomeUnknown(_) => DispatchError::OutcomeUnknown(err.to_string()),
        }
    }
}

impl From<GenerationError> for DispatchError {
    fn from(err: GenerationError) -> Self {
        DispatchError::Transient(err.to_string())
    }
}

/// A matched pair waiting for a worker.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub id: String,
    pub event: Arc<Event>,
    pub automation: Arc<Automation>,
}

impl DispatchJob {
    pub fn new(event: Arc<Event>, automation: Arc<Automation>) -> Self {
        Self {
            id: dispatch_id(&event.external_event_id, automation.id),
            event,
            automation,
        }
    }
}

/// State carried across the attempts of one dispatch.
#[derive(Default)]
struct AttemptState {
    /// Reply produced by an earlier attempt, reused so retries send the same text
    reply: Option<String>,
    public_reply_sent: bool,
}

/// Executes matched automations and records their outcome
pub struct ResponseDispatcher {
    repository: Arc<AutomationRepository>,
    metrics: Arc<MetricsAggregator>,
    sender: Arc<dyn MessageSender>,
    generator: Arc<dyn ReplyGenerator>,
    history: Arc<ConversationLog>,
    policy: RetryPolicy,
    ai_timeout: Duration,
    default_model: String,
    results: DashMap<String, DispatchResult>,
}

impl ResponseDispatcher {
    pub fn new(
        repository: Arc<AutomationRepository>,
        metrics: Arc<MetricsAggregator>,
        sender: Arc<dyn MessageSender>,
        generator: Arc<dyn ReplyGenerator>,
        history: Arc<ConversationLog>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            repository,
            metrics,
            sender,
            generator,
            history,
            policy,
            ai_timeout: DispatchConfig::default().ai_timeout(),
            default_model: AiConfig::default().default_model,
            results: DashMap::new(),
        }
    }

    pub fn with_ai_timeout(mut self, timeout: Duration) -> Self {
        self.ai_timeout = timeout;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Conversation memory fed to AI replies
    pub fn history(&self) -> &Arc<ConversationLog> {
        &self.history
    }

    /// Register a pending dispatch for a matched pair.
    ///
    /// Returns `None` when the pair was registered before, so each pair is
    /// dispatched at most once.
    pub fn register(&self, event: &Event, automation_id: AutomationId) -> Option<DispatchResult> {
        let pending = DispatchResult::pending(event, automation_id);
        match self.results.entry(pending.id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(pending.clone());
                Some(pending)
            }
        }
    }

    /// Fail a registered dispatch that never reached a worker.
    pub fn reject(&self, id: &str, reason: &str) {
        if let Some(mut result) = self.results.get_mut(id) {
            result.fail(reason);
        }
    }

    pub fn result(&self, id: &str) -> Option<DispatchResult> {
        self.results.get(id).map(|r| r.clone())
    }

    /// Most recent results, newest first.
    pub fn recent(&self, limit: usize) -> Vec<DispatchResult> {
        let mut results: Vec<DispatchResult> = self.results.iter().map(|r| r.clone()).collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        results.truncate(limit);
        results
    }

    /// Drop finished results last updated before `retention` ago.
    pub fn purge_finished(&self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;
        let before = self.results.len();
        self.results
            .retain(|_, r| !(r.state.is_terminal() && r.updated_at < cutoff));
        before.saturating_sub(self.results.len())
    }

    fn store(&self, result: &DispatchResult) {
        self.results.insert(result.id.clone(), result.clone());
    }

    /// Run a dispatch to completion.
    pub async fn dispatch(&self, job: DispatchJob) -> DispatchResult {
        let mut result = self
            .result(&job.id)
            .unwrap_or_else(|| DispatchResult::pending(&job.event, job.automation.id));
        if result.state.is_terminal() {
            return result;
        }

        let mut state = AttemptState::default();
        loop {
            result.attempts += 1;
            result.transition(DispatchState::Sending);
            self.store(&result);

            let attempt = result.attempts;
            let error = match self.attempt(&job, &mut state).await {
                Ok(reply) => {
                    self.complete(&job, &reply, &mut result).await;
                    break;
                }
                Err(error) => error,
            };

            match error {
                DispatchError::Transient(message) if self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    debug!(
                        dispatch_id = %job.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Waiting before retry"
                    );
                    result.last_error = Some(message);
                    self.store(&result);
                    tokio::time::sleep(delay).await;
                }
                DispatchError::Transient(message) => {
                    error!(
                        dispatch_id = %job.id,
                        automation_id = %job.automation.id,
                        attempts = attempt,
                        error = %message,
                        "Dispatch failed after all retries"
                    );
                    result.fail(message);
                    self.flag_automation(job.automation.id).await;
                    break;
                }
                DispatchError::Permanent(message) => {
                    error!(
                        dispatch_id = %job.id,
                        automation_id = %job.automation.id,
                        error = %message,
                        "Dispatch failed permanently"
                    );
                    result.fail(message);
                    self.flag_automation(job.automation.id).await;
                    break;
                }
                DispatchError::OutcomeUnknown(message) => {
                    warn!(
                        dispatch_id = %job.id,
                        error = %message,
                        "Send outcome unknown, not retrying"
                    );
                    result.fail(message);
                    break;
                }
                DispatchError::Cancelled(message) => {
                    info!(dispatch_id = %job.id, reason = %message, "Dispatch cancelled");
                    result.fail(message);
                    break;
                }
            }
        }

        self.store(&result);
        result
    }

    async fn attempt(&self, job: &DispatchJob, state: &mut AttemptState) -> Result<String, DispatchError> {
        self.ensure_still_active(job.automation.id).await?;

        let reply = match &state.reply {
            Some(reply) => reply.clone(),
            None => {
                let reply = self.produce_reply(&job.automation.listener, &job.event).await?;
                state.reply = Some(reply.clone());
                reply
            }
        };

        let mut message =
            OutboundMessage::new(job.event.reply_target(), reply.clone(), job.id.clone());
        if let ListenerConfig::Message {
            dm_image, dm_links, ..
        } = &job.automation.listener
        {
            message = message
                .with_image(dm_image.clone())
                .with_links(dm_links.clone());
        }
        self.sender.send(&message).await?;

        if !state.public_reply_sent {
            state.public_reply_sent = true;
            self.send_public_reply(job).await;
        }

        Ok(reply)
    }

    async fn ensure_still_active(&self, id: AutomationId) -> Result<(), DispatchError> {
        match self.repository.get(id).await {
            Ok(Some(automation)) if automation.active => Ok(()),
            Ok(Some(_)) => Err(DispatchError::Cancelled("automation deactivated".to_string())),
            Ok(None) => Err(DispatchError::Cancelled("automation deleted".to_string())),
            Err(e) => Err(DispatchError::Transient(e.to_string())),
        }
    }

    /// Reply text for a listener: the template itself, or an AI reply.
    async fn produce_reply(
        &self,
        listener: &ListenerConfig,
        event: &Event,
    ) -> Result<String, DispatchError> {
        match listener {
            ListenerConfig::Message { message, .. } => Ok(message.clone()),
            ListenerConfig::SmartAi { model, prompt } => {
                let history = self
                    .history
                    .history(&event.source_account_id, &event.author_id);
                let model = model.as_deref().unwrap_or(&self.default_model);
                let request = ReplyRequest::build(model, prompt, history, &event.text);

                match tokio::time::timeout(self.ai_timeout, self.generator.generate(&request)).await {
                    Ok(reply) => Ok(reply?),
                    Err(_) => Err(GenerationError::Timeout(self.ai_timeout).into()),
                }
            }
        }
    }

    async fn send_public_reply(&self, job: &DispatchJob) {
        let ListenerConfig::Message {
            public_reply: Some(text),
            ..
        } = &job.automation.listener
        else {
            return;
        };
        let ReplyTarget::Comment { comment_id } = job.event.reply_target() else {
            return;
        };

        let key = format!("{}#public", job.id);
        if let Err(e) = self.sender.reply_publicly(&comment_id, text, &key).await {
            warn!(dispatch_id = %job.id, error = %e, "Public reply failed");
        }
    }

    async fn complete(&self, job: &DispatchJob, reply: &str, result: &mut DispatchResult) {
        result.last_error = None;
        result.transition(DispatchState::Sent);
        self.store(result);

        let kind: EventKind = job.event.kind;
        self.metrics.record_response(kind);

        if let ListenerConfig::SmartAi { .. } = job.automation.listener {
            self.history.record(
                &job.event.source_account_id,
                &job.event.author_id,
                &job.event.text,
                reply,
            );
        }

        if let Err(e) = self
            .repository
            .record_sent(job.automation.id, kind, Utc::now())
            .await
        {
            warn!(automation_id = %job.automation.id, error = %e, "Failed to record trigger");
        }

        info!(
            dispatch_id = %job.id,
            automation_id = %job.automation.id,
            attempts = result.attempts,
            "Response sent"
        );
    }

    async fn flag_automation(&self, id: AutomationId) {
        if let Err(e) = self.repository.mark_error(id).await {
            warn!(automation_id = %id, error = %e, "Failed to mark automation as error");
        }
    }
}
