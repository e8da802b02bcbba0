//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "autoreply-server",
    about = "Autoreply Instagram automation server",
    version,
    long_about = "Receives Instagram webhooks, matches comments and direct messages \
                  against keyword automations and sends the configured replies."
)]
pub struct Args {
    /// Optional configuration file layered under environment variables
    #[arg(short, long, env = "AUTOREPLY_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP server port, overriding `server.port`
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Environment (dev, staging, prod)
    #[arg(
        short,
        long,
        env = "ENVIRONMENT",
        default_value = "dev",
        value_parser = ["dev", "staging", "prod"]
    )]
    pub env: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Args {
    /// Validate the arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(path) = &self.config {
            if !path.is_file() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }
        Ok(())
    }
}
