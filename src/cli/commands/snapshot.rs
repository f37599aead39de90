//! Snapshot command implementation.

use crate::storage::snapshot::{FileSnapshotter, Snapshotter};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Snapshot operations.
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    pub command: SnapshotCommand,
}

/// Snapshot subcommands.
#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    /// List snapshots in a directory, oldest first.
    List {
        /// Snapshots directory.
        #[arg(short, long, default_value = "data/snapshots")]
        dir: PathBuf,
    },
    /// Dump the entries of one snapshot file.
    Inspect {
        /// Snapshot path.
        path: PathBuf,
    },
}

/// Run the snapshot command.
pub fn run_snapshot(args: SnapshotArgs) -> Result<()> {
    match args.command {
        SnapshotCommand::List { dir } => {
            let mut names: Vec<String> = std::fs::read_dir(&dir)
                .with_context(|| format!("failed to read directory {}", dir.display()))?
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| name.starts_with("snapshot.") && name.ends_with(".dat"))
                .collect();
            names.sort();

            if names.is_empty() {
                println!("no snapshots in {}", dir.display());
                return Ok(());
            }
            for name in names {
                println!("{name}");
            }
        }
        SnapshotCommand::Inspect { path } => {
            // Retention never runs on the inspect path; the count is
            // irrelevant here.
            let snapshotter = FileSnapshotter::new(
                path.parent().unwrap_or_else(|| std::path::Path::new(".")),
                usize::MAX,
            );
            let state = snapshotter
                .restore(&path)
                .with_context(|| format!("failed to restore snapshot {}", path.display()))?;

            let mut keys: Vec<&String> = state.keys().collect();
            keys.sort();
            for key in &keys {
                println!("{key} = {}", state[*key]);
            }
            println!("{} entries", state.len());
        }
    }
    Ok(())
}
