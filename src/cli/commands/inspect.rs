//! Inspect command implementation.
//!
//! Walks WAL files record by record so operators can audit on-disk
//! state after an incident.

use crate::storage::codec;
use crate::storage::wal::{LogOp, LogRecord};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

/// Inspect WAL files.
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(subcommand)]
    pub command: InspectCommand,
}

/// Inspect subcommands.
#[derive(Subcommand, Debug)]
pub enum InspectCommand {
    /// Dump the records of one or more WAL files.
    Wal {
        /// WAL file paths.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

/// Run the inspect command.
pub fn run_inspect(args: InspectArgs) -> Result<()> {
    match args.command {
        InspectCommand::Wal { paths } => {
            for path in paths {
                inspect_wal(&path)?;
            }
        }
    }
    Ok(())
}

fn inspect_wal(path: &PathBuf) -> Result<()> {
    println!("wal: {}", path.display());

    let file =
        File::open(path).with_context(|| format!("failed to open wal file {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut records = 0usize;

    loop {
        let payload = match codec::read_frame(&mut reader) {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                println!("  (partial trailing record discarded)");
                break;
            }
            Err(err) => return Err(err).context("failed to read wal record"),
        };
        let record: LogRecord =
            bincode::deserialize(&payload).context("failed to decode wal record")?;
        match record.op {
            LogOp::Put { key, value } => {
                println!("  {:>8}  PUT     {key} = {value}", record.id);
            }
            LogOp::Delete { key } => {
                println!("  {:>8}  DELETE  {key}", record.id);
            }
        }
        records += 1;
    }

    println!("  {records} records");
    Ok(())
}
