//! CLI command implementations.

mod config;
mod inspect;
mod snapshot;
mod start;

pub use config::{run_config, ConfigArgs};
pub use inspect::{run_inspect, InspectArgs};
pub use snapshot::{run_snapshot, SnapshotArgs};
pub use start::{run_start, StartArgs};
