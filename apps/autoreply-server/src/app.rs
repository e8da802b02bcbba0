//! Application state and initialization

use anyhow::{Context, Result};
use autoreply_core::AppConfig;
use autoreply_engine::{AutomationEngine, GraphApiSender, OpenAiReplyGenerator};
use autoreply_webhook::{IdempotencyStore, WebhookGateway};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cli::Args;
use crate::server::Server;

/// Background tasks started with the application
pub struct BackgroundTasks {
    /// Dispatch workers, drained on shutdown
    pub workers: Vec<JoinHandle<()>>,
    /// Revalidation, trend and sweep loops, aborted on shutdown
    pub periodic: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Let the workers finish queued dispatches within `timeout`, then stop
    /// the periodic loops. Returns whether the queue drained in time.
    pub async fn shutdown(self, engine: &AutomationEngine, timeout: Duration) -> bool {
        let drained = engine.shutdown(self.workers, timeout).await;

        for task in &self.periodic {
            task.abort();
        }
        for task in self.periodic {
            let _ = task.await;
        }
        drained
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<AutomationEngine>,
    pub gateway: Arc<WebhookGateway>,
    pub idempotency: Arc<IdempotencyStore>,
}

impl AppState {
    /// Wire every component from configuration and start the dispatch
    /// workers. Returns the state and the spawned task handles.
    pub async fn new(config: AppConfig) -> Result<(Self, BackgroundTasks)> {
        info!("Initializing application components");

        if !config.webhook.signature_required() {
            warn!("webhook.app_secret is empty; payload signature verification is disabled");
        }
        if config.webhook.verify_token.is_empty() {
            warn!("webhook.verify_token is empty; subscription handshakes will be rejected");
        }

        let sender = GraphApiSender::new(&config.platform)
            .context("Failed to create Graph API client")?;
        let generator = OpenAiReplyGenerator::new(&config.ai, config.dispatch.ai_timeout())
            .context("Failed to create AI client")?;

        let (engine, pool) = AutomationEngine::builder(Arc::new(sender), Arc::new(generator))
            .with_config(&config)
            .build();
        let engine = Arc::new(engine);

        engine
            .repository()
            .refresh()
            .await
            .context("Failed to load automations")?;

        let idempotency = Arc::new(IdempotencyStore::new(config.webhook.idempotency_ttl()));
        let gateway = Arc::new(WebhookGateway::new(
            engine.clone(),
            idempotency.clone(),
            &config.webhook,
        ));

        let workers = pool.spawn();
        info!(workers = workers.len(), "Dispatch workers started");

        let periodic = vec![
            engine
                .repository()
                .clone()
                .spawn_revalidation(config.repository.revalidate_interval()),
            engine
                .metrics()
                .clone()
                .spawn_trend_recompute(config.metrics.trend_interval()),
            idempotency.clone().spawn_sweeper(config.webhook.sweep_interval()),
            spawn_dispatch_purge(
                engine.clone(),
                config.webhook.sweep_interval(),
                config.webhook.idempotency_ttl(),
                config.dispatch.history_ttl(),
            ),
        ];
        let tasks = BackgroundTasks { workers, periodic };

        let state = Self {
            config: Arc::new(config),
            engine,
            gateway,
            idempotency,
        };
        Ok((state, tasks))
    }
}

/// Periodically drop finished dispatch results older than `retention`
/// and conversations idle for longer than `history_ttl`
fn spawn_dispatch_purge(
    engine: Arc<AutomationEngine>,
    interval: Duration,
    retention: Duration,
    history_ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = engine.dispatcher().purge_finished(retention);
            if purged > 0 {
                debug!(purged, "Purged finished dispatch results");
            }
            let forgotten = engine.dispatcher().history().purge_idle(history_ttl);
            if forgotten > 0 {
                debug!(forgotten, "Purged idle conversations");
            }
        }
    })
}

/// Main application
pub struct App {
    args: Args,
    state: AppState,
    tasks: BackgroundTasks,
}

impl App {
    /// Build the application with all dependencies
    pub async fn build(args: Args) -> Result<Self> {
        args.validate().context("Invalid command line arguments")?;

        let mut config = load_config(&args)?;
        if let Some(port) = args.port {
            config.server.port = port;
        }

        let (state, tasks) = AppState::new(config).await?;
        Ok(Self { args, state, tasks })
    }

    /// Run the application until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        info!(
            address = %self.state.config.server.address(),
            env = %self.args.env,
            "Starting server"
        );

        let engine = self.state.engine.clone();
        let timeout = self.state.config.dispatch.shutdown_timeout();

        let server = Server::new(self.state);
        let result = server.run().await;

        info!(timeout_secs = timeout.as_secs(), "Draining dispatch queue");
        if !self.tasks.shutdown(&engine, timeout).await {
            warn!("Some dispatches were still running at shutdown");
        }
        result
    }
}

fn load_config(args: &Args) -> Result<AppConfig> {
    match &args.config {
        Some(path) => {
            let path = path
                .to_str()
                .context("Config path is not valid UTF-8")?;
            AppConfig::load_from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path))
        }
        None => AppConfig::load().context("Failed to load configuration"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_state_creation() {
        let (state, tasks) = AppState::new(AppConfig::default()).await.unwrap();

        assert_eq!(state.engine.repository().active_count(), 0);
        assert!(state.idempotency.is_empty());
        assert_eq!(tasks.workers.len(), state.config.dispatch.workers);
        assert_eq!(tasks.periodic.len(), 4);

        assert!(tasks.shutdown(&state.engine, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_shutdown_stops_periodic_tasks() {
        let (state, tasks) = AppState::new(AppConfig::default()).await.unwrap();
        let periodic: Vec<_> = tasks.periodic.iter().map(|t| t.abort_handle()).collect();

        assert!(tasks.shutdown(&state.engine, Duration::from_secs(5)).await);
        assert!(periodic.iter().all(|t| t.is_finished()));
    }
}
