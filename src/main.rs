//! Tessera - unified CLI entrypoint.
//!
//! Usage:
//!   tessera start --config config/tessera.toml
//!   tessera config validate --config config/tessera.toml
//!   tessera config show
//!   tessera inspect wal <wal-file>...
//!   tessera snapshot list --dir data/snapshots
//!   tessera snapshot inspect <snapshot-file>

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tessera::cli::commands::{run_config, run_inspect, run_snapshot, run_start};
use tessera::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/tessera.toml"));

    match cli.command {
        Commands::Start(_args) => run_start(&config_path, cli.log_level.as_deref()).await,
        Commands::Config(args) => run_config(args, &config_path),
        Commands::Inspect(args) => run_inspect(args),
        Commands::Snapshot(args) => run_snapshot(args),
    }
}
