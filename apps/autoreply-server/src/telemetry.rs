//! Telemetry initialization (structured logging)

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::Args;

/// Initialize the global subscriber. `RUST_LOG` takes precedence over
/// `--log-level`.
pub fn init_telemetry(args: &Args) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("Failed to create environment filter")?;

    if args.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()
            .context("Failed to install JSON subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(true),
            )
            .try_init()
            .context("Failed to install subscriber")?;
    }

    Ok(())
}
