//! Automation engine for Autoreply
//!
//! This crate turns normalized inbound events into automated replies:
//! - Snapshot-based automation repository with write-through updates
//! - Keyword matching against active automations
//! - Response dispatch with retry, backed by a bounded worker queue
//! - Dashboard metrics

pub mod dispatcher;
pub mod error;
pub mod history;
pub mod matcher;
pub mod metrics;
pub mod outbound;
pub mod queue;
pub mod reply;
pub mod repository;
pub mod retry;
pub mod store;

pub use dispatcher::{DispatchError, DispatchJob, ResponseDispatcher};
pub use error::{EngineError, Result};
pub use history::ConversationLog;
pub use matcher::AutomationMatcher;
pub use metrics::MetricsAggregator;
pub use outbound::{GraphApiSender, MessageSender, OutboundMessage, SendError};
pub use queue::{DispatchQueue, DispatchWorkerPool, EnqueueError};
pub use reply::{ChatMessage, GenerationError, OpenAiReplyGenerator, ReplyGenerator, ReplyRequest};
pub use repository::{AutomationRepository, AutomationSnapshot};
pub use retry::RetryPolicy;
pub use store::{AutomationStore, InMemoryAutomationStore};

use autoreply_core::{AiConfig, AppConfig, DispatchConfig, Event, MetricsConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What happened to a first-seen event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// No active automation matched
    Ignored,
    /// At least one automation matched
    Matched {
        /// Pairs handed to the worker queue
        dispatched: usize,
        /// Pairs refused because the queue was full
        rejected: usize,
    },
}

/// Routes normalized events to matching automations
pub struct AutomationEngine {
    repository: Arc<AutomationRepository>,
    matcher: AutomationMatcher,
    dispatcher: Arc<ResponseDispatcher>,
    metrics: Arc<MetricsAggregator>,
    queue: DispatchQueue,
}

impl AutomationEngine {
    pub fn builder(
        sender: Arc<dyn MessageSender>,
        generator: Arc<dyn ReplyGenerator>,
    ) -> EngineBuilder {
        EngineBuilder::new(sender, generator)
    }

    pub fn repository(&self) -> &Arc<AutomationRepository> {
        &self.repository
    }

    pub fn dispatcher(&self) -> &Arc<ResponseDispatcher> {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// Close the queue and wait up to `timeout` for the workers to finish
    /// the jobs already queued. Workers still running at the deadline are
    /// aborted. Returns whether the queue drained in time.
    pub async fn shutdown(&self, mut workers: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        self.queue.close();

        let drained = tokio::time::timeout(timeout, async {
            for worker in workers.iter_mut() {
                if let Err(e) = worker.await {
                    warn!(error = %e, "Dispatch worker ended abnormally");
                }
            }
        })
        .await
        .is_ok();

        if drained {
            info!("Dispatch queue drained");
        } else {
            warn!(
                timeout_secs = timeout.as_secs(),
                "Dispatch drain timed out, aborting workers"
            );
            for worker in &workers {
                worker.abort();
            }
        }
        drained
    }

    /// Whether any active automation matches the event. Read-only: nothing
    /// is registered, dispatched or counted.
    pub fn has_matches(&self, event: &Event) -> bool {
        let snapshot = self.repository.snapshot();
        let text = event.text.to_lowercase();
        snapshot
            .active(event.kind.trigger_type())
            .iter()
            .any(|automation| self.matcher.is_match(automation, event, &text))
    }

    /// Match a first-seen event and enqueue one dispatch per matching
    /// automation. Never waits on the dispatch itself.
    pub fn route(&self, event: Arc<Event>) -> RouteOutcome {
        self.metrics.record_engagement();

        let snapshot = self.repository.snapshot();
        let matches = self
            .matcher
            .find_matches(&event, snapshot.active(event.kind.trigger_type()));

        if matches.is_empty() {
            debug!(event_id = %event.external_event_id, kind = %event.kind, "No automation matched");
            return RouteOutcome::Ignored;
        }

        let mut dispatched = 0;
        let mut rejected = 0;
        for automation in matches {
            if self.dispatcher.register(&event, automation.id).is_none() {
                continue;
            }

            let job = DispatchJob::new(event.clone(), automation);
            let id = job.id.clone();
            match self.queue.try_enqueue(job) {
                Ok(()) => dispatched += 1,
                Err(e) => {
                    warn!(dispatch_id = %id, error = %e, "Dispatch rejected");
                    self.dispatcher.reject(&id, &e.to_string());
                    rejected += 1;
                }
            }
        }

        debug!(
            event_id = %event.external_event_id,
            dispatched,
            rejected,
            snapshot_version = snapshot.version(),
            "Event routed"
        );
        RouteOutcome::Matched {
            dispatched,
            rejected,
        }
    }
}

/// Builder wiring the engine components together
pub struct EngineBuilder {
    store: Arc<dyn AutomationStore>,
    sender: Arc<dyn MessageSender>,
    generator: Arc<dyn ReplyGenerator>,
    dispatch: DispatchConfig,
    retry_policy: Option<RetryPolicy>,
    default_model: String,
    trend_window: Duration,
}

impl EngineBuilder {
    pub fn new(sender: Arc<dyn MessageSender>, generator: Arc<dyn ReplyGenerator>) -> Self {
        Self {
            store: Arc::new(InMemoryAutomationStore::new()),
            sender,
            generator,
            dispatch: DispatchConfig::default(),
            retry_policy: None,
            default_model: AiConfig::default().default_model,
            trend_window: MetricsConfig::default().trend_window(),
        }
    }

    /// Take the dispatch settings, default model and trend window from the
    /// application configuration.
    pub fn with_config(self, config: &AppConfig) -> Self {
        self.with_dispatch_config(config.dispatch.clone())
            .with_default_model(config.ai.default_model.clone())
            .with_trend_window(config.metrics.trend_window())
    }

    pub fn with_store(mut self, store: Arc<dyn AutomationStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_dispatch_config(mut self, config: DispatchConfig) -> Self {
        self.dispatch = config;
        self
    }

    /// Override the policy derived from the dispatch configuration
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_trend_window(mut self, window: Duration) -> Self {
        self.trend_window = window;
        self
    }

    /// Build the engine and the worker pool that drains its queue.
    pub fn build(self) -> (AutomationEngine, DispatchWorkerPool) {
        let repository = Arc::new(AutomationRepository::new(self.store));
        let metrics = Arc::new(MetricsAggregator::new(repository.clone(), self.trend_window));
        let history = Arc::new(ConversationLog::new(self.dispatch.history_limit));
        let policy = self
            .retry_policy
            .unwrap_or_else(|| RetryPolicy::from_config(&self.dispatch));

        let dispatcher = Arc::new(
            ResponseDispatcher::new(
                repository.clone(),
                metrics.clone(),
                self.sender,
                self.generator,
                history,
                policy,
            )
            .with_ai_timeout(self.dispatch.ai_timeout())
            .with_default_model(self.default_model),
        );

        let (queue, pool) = DispatchQueue::new(
            dispatcher.clone(),
            self.dispatch.queue_capacity,
            self.dispatch.workers,
        );

        let engine = AutomationEngine {
            repository,
            matcher: AutomationMatcher::new(),
            dispatcher,
            metrics,
            queue,
        };
        (engine, pool)
    }
}
