//! Start command implementation.

use crate::core::config::Config;
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start the Tessera server.
#[derive(Args, Debug)]
pub struct StartArgs {
    // No additional arguments; config is handled globally.
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Run the start command against the given config path.
pub async fn run_start(config_path: &Path, log_level_override: Option<&str>) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let log_level = log_level_override.unwrap_or(&config.telemetry.log_level);
    init_tracing(log_level);

    let runtime = Runtime::new(config)?;
    runtime.run().await
}
