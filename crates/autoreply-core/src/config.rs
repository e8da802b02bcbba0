use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Environment variable prefix, e.g. `AUTOREPLY__WEBHOOK__APP_SECRET`.
pub const ENV_PREFIX: &str = "AUTOREPLY";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub dispatch: DispatchConfig,
    pub platform: PlatformConfig,
    pub ai: AiConfig,
    pub repository: RepositoryConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env(ENV_PREFIX)
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Self::with_defaults(Config::builder())?.add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Self::with_defaults(Config::builder())?
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    fn with_defaults(
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        builder
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("webhook.verify_token", "")?
            .set_default("webhook.app_secret", "")?
            .set_default("webhook.signature_header", default_signature_header())?
            .set_default("webhook.idempotency_ttl_secs", default_idempotency_ttl_secs() as i64)?
            .set_default("webhook.sweep_interval_secs", default_sweep_interval_secs() as i64)?
            .set_default("dispatch.workers", default_workers() as i64)?
            .set_default("dispatch.queue_capacity", default_queue_capacity() as i64)?
            .set_default("dispatch.max_attempts", default_max_attempts() as i64)?
            .set_default("dispatch.base_delay_ms", default_base_delay_ms() as i64)?
            .set_default("dispatch.max_delay_ms", default_max_delay_ms() as i64)?
            .set_default("dispatch.jitter_factor", default_jitter_factor())?
            .set_default("dispatch.ai_timeout_secs", default_ai_timeout_secs() as i64)?
            .set_default("dispatch.history_limit", default_history_limit() as i64)?
            .set_default("dispatch.history_ttl_secs", default_history_ttl_secs() as i64)?
            .set_default(
                "dispatch.shutdown_timeout_secs",
                default_shutdown_timeout_secs() as i64,
            )?
            .set_default("platform.graph_base_url", default_graph_base_url())?
            .set_default("platform.page_id", "")?
            .set_default("platform.page_access_token", "")?
            .set_default("platform.request_timeout_secs", default_request_timeout_secs() as i64)?
            .set_default("ai.base_url", default_ai_base_url())?
            .set_default("ai.api_key", "")?
            .set_default("ai.default_model", default_model())?
            .set_default("ai.max_tokens", default_max_tokens() as i64)?
            .set_default(
                "repository.revalidate_interval_secs",
                default_revalidate_interval_secs() as i64,
            )?
            .set_default("metrics.trend_window_secs", default_trend_window_secs() as i64)?
            .set_default("metrics.trend_interval_secs", default_trend_interval_secs() as i64)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            webhook: WebhookConfig::default(),
            dispatch: DispatchConfig::default(),
            platform: PlatformConfig::default(),
            ai: AiConfig::default(),
            repository: RepositoryConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }

    pub fn with_host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Inbound webhook configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Secret echoed back by the platform during the subscription handshake
    #[serde(default)]
    pub verify_token: String,
    /// HMAC key for payload signatures; empty disables verification
    #[serde(default)]
    pub app_secret: String,
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl WebhookConfig {
    pub fn new(verify_token: String, app_secret: String) -> Self {
        Self {
            verify_token,
            app_secret,
            ..Self::default()
        }
    }

    pub fn signature_required(&self) -> bool {
        !self.app_secret.is_empty()
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            verify_token: String::new(),
            app_secret: String::new(),
            signature_header: default_signature_header(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_signature_header() -> String {
    "X-Hub-Signature-256".to_string()
}

fn default_idempotency_ttl_secs() -> u64 {
    86_400 // 24 hours
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// Response dispatch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    #[serde(default = "default_ai_timeout_secs")]
    pub ai_timeout_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Conversations idle for longer than this are forgotten
    #[serde(default = "default_history_ttl_secs")]
    pub history_ttl_secs: u64,
    /// How long shutdown waits for queued dispatches to finish
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl DispatchConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs)
    }

    pub fn history_ttl(&self) -> Duration {
        Duration::from_secs(self.history_ttl_secs.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
            ai_timeout_secs: default_ai_timeout_secs(),
            history_limit: default_history_limit(),
            history_ttl_secs: default_history_ttl_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_factor() -> f64 {
    0.2
}

fn default_ai_timeout_secs() -> u64 {
    15
}

fn default_history_limit() -> usize {
    20
}

fn default_history_ttl_secs() -> u64 {
    86_400
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

/// Social platform (Graph API) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
    #[serde(default)]
    pub page_id: String,
    #[serde(default)]
    pub page_access_token: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl PlatformConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            graph_base_url: default_graph_base_url(),
            page_id: String::new(),
            page_access_token: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_graph_base_url() -> String {
    "https://graph.facebook.com/v24.0".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// AI reply provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            api_key: String::new(),
            default_model: default_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    256
}

/// Automation cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_revalidate_interval_secs")]
    pub revalidate_interval_secs: u64,
}

impl RepositoryConfig {
    pub fn revalidate_interval(&self) -> Duration {
        Duration::from_secs(self.revalidate_interval_secs.max(1))
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            revalidate_interval_secs: default_revalidate_interval_secs(),
        }
    }
}

fn default_revalidate_interval_secs() -> u64 {
    60
}

/// Dashboard metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_trend_window_secs")]
    pub trend_window_secs: u64,
    #[serde(default = "default_trend_interval_secs")]
    pub trend_interval_secs: u64,
}

impl MetricsConfig {
    pub fn trend_window(&self) -> Duration {
        Duration::from_secs(self.trend_window_secs.max(1))
    }

    pub fn trend_interval(&self) -> Duration {
        Duration::from_secs(self.trend_interval_secs.max(1))
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            trend_window_secs: default_trend_window_secs(),
            trend_interval_secs: default_trend_interval_secs(),
        }
    }
}

fn default_trend_window_secs() -> u64 {
    86_400
}

fn default_trend_interval_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_creation() {
        let config = ServerConfig::new()
            .with_host("127.0.0.1".to_string())
            .with_port(3000);

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_webhook_config_defaults() {
        let config = WebhookConfig::default();

        assert_eq!(config.signature_header, "X-Hub-Signature-256");
        assert_eq!(config.idempotency_ttl(), Duration::from_secs(86_400));
        assert!(!config.signature_required());

        let config = WebhookConfig::new("token".to_string(), "secret".to_string());
        assert!(config.signature_required());
    }

    #[test]
    fn test_dispatch_config_defaults() {
        let config = DispatchConfig::default().with_workers(8);

        assert_eq!(config.workers, 8);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.ai_timeout(), Duration::from_secs(15));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_from_env_uses_defaults() {
        let config = AppConfig::load_from_env("AUTOREPLY_TEST_UNSET").unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.platform.graph_base_url, "https://graph.facebook.com/v24.0");
        assert_eq!(config.ai.default_model, "gpt-4o");
        assert_eq!(config.metrics.trend_window_secs, 86_400);
        assert_eq!(config.repository.revalidate_interval_secs, 60);
        assert_eq!(config.dispatch.shutdown_timeout_secs, 30);
    }
}
