//! Configuration parsing and validation.
//!
//! Tessera configuration is loaded from TOML files with CLI overrides.
//! Sections mirror the subsystems: engine limits, shard rebuild policy,
//! WAL durability, snapshot retention, the client listener, and the
//! replication mode. Interval-valued settings are stored as integer
//! millisecond fields with [`Duration`] accessors.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Hard ceiling on the shard count; the shard array is immutable after
/// construction and indexed by `hash % count`.
pub const MAX_SHARDS: usize = 1024;

/// Top-level Tessera configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// KV engine limits.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Shard rebuild policy.
    #[serde(default)]
    pub shards: ShardsConfig,

    /// Write-ahead log settings (standalone mode only).
    #[serde(default)]
    pub wal: WalConfig,

    /// Snapshot directory and retention.
    #[serde(default)]
    pub snapshots: SnapshotsConfig,

    /// Client-facing HTTP listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// Replication mode and cluster addresses.
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// KV engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum key size in bytes.
    #[serde(default = "default_max_key_size")]
    pub max_key_size: usize,

    /// Maximum value size in bytes.
    #[serde(default = "default_max_value_size")]
    pub max_value_size: usize,

    /// Number of shards in the engine map.
    #[serde(default = "default_shards_count")]
    pub shards_count: usize,
}

/// Shard rebuild policy.
///
/// A shard is rebuilt when all three hold: `deletes >= min_deletes`,
/// `live_len <= floor(max_size * sparse_ratio)`, and
/// `puts + deletes >= min_ops_until_rebuild`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardsConfig {
    /// Supervisor sweep period in milliseconds.
    #[serde(default = "default_check_freq_ms")]
    pub check_freq_ms: u64,

    /// Occupancy ratio below which a shard counts as sparse, in (0, 1].
    #[serde(default = "default_sparse_ratio")]
    pub sparse_ratio: f64,

    /// Minimum operations (puts + deletes) since the last rebuild.
    #[serde(default = "default_min_ops_until_rebuild")]
    pub min_ops_until_rebuild: u64,

    /// Minimum deletes since the last rebuild.
    #[serde(default = "default_min_deletes")]
    pub min_deletes: u64,
}

/// Write-ahead log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// WAL file path.
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// File size in bytes that triggers compaction into a snapshot.
    #[serde(default = "default_wal_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Fsync ticker period in milliseconds.
    #[serde(default = "default_fsync_interval_ms")]
    pub fsync_interval_ms: u64,

    /// Attempts for the final fsync on shutdown.
    #[serde(default = "default_fsync_retries")]
    pub fsync_retries: u32,

    /// Delay between final-fsync attempts in milliseconds.
    #[serde(default = "default_fsync_retry_ms")]
    pub fsync_retry_ms: u64,
}

/// Snapshot directory and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotsConfig {
    /// Directory holding `snapshot.<ts>.<seq>.dat` files.
    #[serde(default = "default_snapshots_dir")]
    pub dir: String,

    /// Newest snapshots to retain; older files are deleted after each
    /// successful create.
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,
}

/// Client-facing HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g. "0.0.0.0:16700").
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Per-request deadline in milliseconds for commit waits and
    /// linearizable reads.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Replication mode and cluster addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Serving mode: "standalone" (WAL durability) or "replicated"
    /// (Raft log durability).
    #[serde(default = "default_mode")]
    pub mode: Mode,

    /// Public client addresses of all peers, indexed by Raft node id.
    /// Used to build redirect targets for non-leader requests.
    #[serde(default)]
    pub public_addrs: Vec<String>,

    /// Futures-store garbage collection period in milliseconds.
    #[serde(default = "default_futures_gc_period_ms")]
    pub futures_gc_period_ms: u64,
}

/// Serving mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Single node; durability via the local WAL.
    Standalone,
    /// Raft cluster member; durability via the consensus log.
    Replicated,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_max_key_size() -> usize {
    1024
}
fn default_max_value_size() -> usize {
    1024
}
fn default_shards_count() -> usize {
    64
}
fn default_check_freq_ms() -> u64 {
    30_000
}
fn default_sparse_ratio() -> f64 {
    0.5
}
fn default_min_ops_until_rebuild() -> u64 {
    2000
}
fn default_min_deletes() -> u64 {
    500
}
fn default_log_file() -> String {
    "data/wal.log".to_string()
}
fn default_wal_max_size_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_fsync_interval_ms() -> u64 {
    300
}
fn default_fsync_retries() -> u32 {
    3
}
fn default_fsync_retry_ms() -> u64 {
    500
}
fn default_snapshots_dir() -> String {
    "data/snapshots".to_string()
}
fn default_max_snapshots() -> usize {
    2
}
fn default_bind() -> String {
    "0.0.0.0:16700".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_mode() -> Mode {
    Mode::Standalone
}
fn default_futures_gc_period_ms() -> u64 {
    180_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_key_size: default_max_key_size(),
            max_value_size: default_max_value_size(),
            shards_count: default_shards_count(),
        }
    }
}

impl Default for ShardsConfig {
    fn default() -> Self {
        Self {
            check_freq_ms: default_check_freq_ms(),
            sparse_ratio: default_sparse_ratio(),
            min_ops_until_rebuild: default_min_ops_until_rebuild(),
            min_deletes: default_min_deletes(),
        }
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
            max_size_bytes: default_wal_max_size_bytes(),
            fsync_interval_ms: default_fsync_interval_ms(),
            fsync_retries: default_fsync_retries(),
            fsync_retry_ms: default_fsync_retry_ms(),
        }
    }
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self {
            dir: default_snapshots_dir(),
            max_snapshots: default_max_snapshots(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            public_addrs: Vec::new(),
            futures_gc_period_ms: default_futures_gc_period_ms(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            shards: ShardsConfig::default(),
            wal: WalConfig::default(),
            snapshots: SnapshotsConfig::default(),
            server: ServerConfig::default(),
            replication: ReplicationConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl ShardsConfig {
    /// Supervisor sweep period.
    pub fn check_freq(&self) -> Duration {
        Duration::from_millis(self.check_freq_ms)
    }
}

impl WalConfig {
    /// Fsync ticker period.
    pub fn fsync_interval(&self) -> Duration {
        Duration::from_millis(self.fsync_interval_ms)
    }

    /// Delay between final-fsync attempts.
    pub fn fsync_retry(&self) -> Duration {
        Duration::from_millis(self.fsync_retry_ms)
    }
}

impl ServerConfig {
    /// Per-request deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ReplicationConfig {
    /// Futures-store GC period.
    pub fn futures_gc_period(&self) -> Duration {
        Duration::from_millis(self.futures_gc_period_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.engine.max_key_size > 0,
            "engine.max_key_size must be positive"
        );
        anyhow::ensure!(
            self.engine.max_value_size > 0,
            "engine.max_value_size must be positive"
        );
        anyhow::ensure!(
            (1..=MAX_SHARDS).contains(&self.engine.shards_count),
            "engine.shards_count must be in 1..={}, got {}",
            MAX_SHARDS,
            self.engine.shards_count
        );
        anyhow::ensure!(
            self.shards.sparse_ratio > 0.0 && self.shards.sparse_ratio <= 1.0,
            "shards.sparse_ratio must be in (0, 1], got {}",
            self.shards.sparse_ratio
        );
        anyhow::ensure!(
            self.shards.check_freq_ms > 0,
            "shards.check_freq_ms must be positive"
        );
        anyhow::ensure!(
            self.wal.max_size_bytes > 0,
            "wal.max_size_bytes must be positive"
        );
        anyhow::ensure!(
            self.wal.fsync_interval_ms > 0,
            "wal.fsync_interval_ms must be positive"
        );
        anyhow::ensure!(self.wal.fsync_retries > 0, "wal.fsync_retries must be positive");
        anyhow::ensure!(
            self.snapshots.max_snapshots >= 1,
            "snapshots.max_snapshots must be at least 1"
        );
        anyhow::ensure!(
            self.server.request_timeout_ms > 0,
            "server.request_timeout_ms must be positive"
        );
        anyhow::ensure!(
            self.replication.futures_gc_period_ms > 0,
            "replication.futures_gc_period_ms must be positive"
        );
        if self.replication.mode == Mode::Replicated {
            anyhow::ensure!(
                !self.replication.public_addrs.is_empty(),
                "replication.public_addrs must list every peer in replicated mode"
            );
        }
        Ok(())
    }
}
