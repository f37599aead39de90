//! Snapshot files.
//!
//! A snapshot is a point-in-time serialization of the full engine state
//! plus the sequence marker it covers. One file per snapshot, named
//! `snapshot.<unix_nanos>.<last_seq>.dat`, containing length-prefixed
//! [`SnapshotEntry`] records until EOF. The timestamp in the name gives
//! deterministic latest-selection and retention ordering.

use crate::core::error::{KvError, KvResult};
use crate::storage::codec;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// One key-value pair inside a snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: String,
}

/// Creates, locates, and restores snapshots.
///
/// A trait seam so tests can substitute an in-memory snapshotter and the
/// WAL compaction path stays mockable.
pub trait Snapshotter: Send + Sync {
    /// Write `state` as a new snapshot covering `last_seq` and apply
    /// retention. Returns the new file's path.
    fn create(&self, state: &HashMap<String, String>, last_seq: u64) -> Result<PathBuf>;

    /// Locate the newest snapshot. Returns `None` when the directory
    /// holds no snapshot files.
    fn find_latest(&self) -> Result<Option<(PathBuf, u64)>>;

    /// Stream a snapshot file back into a mapping.
    fn restore(&self, path: &Path) -> KvResult<HashMap<String, String>>;
}

/// Directory-backed snapshotter with count-based retention.
pub struct FileSnapshotter {
    dir: PathBuf,
    max_snapshots: usize,
}

impl FileSnapshotter {
    pub fn new(dir: impl Into<PathBuf>, max_snapshots: usize) -> Self {
        Self {
            dir: dir.into(),
            max_snapshots,
        }
    }

    /// Parse `snapshot.<unix_nanos>.<last_seq>.dat` into its timestamp
    /// and sequence parts.
    fn parse_name(name: &str) -> Option<(u128, u64)> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() != 4 || parts[0] != "snapshot" || parts[3] != "dat" {
            return None;
        }
        let timestamp = parts[1].parse::<u128>().ok()?;
        let last_seq = parts[2].parse::<u64>().ok()?;
        Some((timestamp, last_seq))
    }

    /// All snapshot files in the directory with their parsed names.
    fn list(&self) -> Result<Vec<(PathBuf, u128, u64)>> {
        let mut snapshots = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read snapshots directory {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry.context("failed to read snapshots directory entry")?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((timestamp, last_seq)) = Self::parse_name(name) {
                snapshots.push((entry.path(), timestamp, last_seq));
            }
        }
        Ok(snapshots)
    }

    /// Delete the oldest snapshots until at most `max_snapshots` remain.
    /// Failures here are warnings; the new snapshot is already durable.
    fn apply_retention(&self) -> Result<()> {
        let mut snapshots = self.list()?;
        if snapshots.len() <= self.max_snapshots {
            return Ok(());
        }
        snapshots.sort_by(|a, b| (a.1, &a.0).cmp(&(b.1, &b.0)));

        let excess = snapshots.len() - self.max_snapshots;
        for (path, _, _) in &snapshots[..excess] {
            tracing::debug!(path = %path.display(), "deleting old snapshot");
            if let Err(err) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %err, "failed to delete old snapshot");
            }
        }
        Ok(())
    }
}

impl Snapshotter for FileSnapshotter {
    fn create(&self, state: &HashMap<String, String>, last_seq: u64) -> Result<PathBuf> {
        let unix_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock before unix epoch")?
            .as_nanos();
        let path = self
            .dir
            .join(format!("snapshot.{unix_nanos}.{last_seq}.dat"));

        let file = File::create(&path)
            .with_context(|| format!("failed to create snapshot file {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        let result = (|| -> Result<()> {
            for (key, value) in state {
                let entry = SnapshotEntry {
                    key: key.clone(),
                    value: value.clone(),
                };
                let payload =
                    bincode::serialize(&entry).context("failed to serialize snapshot entry")?;
                codec::write_frame(&mut writer, &payload)
                    .context("failed to write snapshot entry")?;
            }
            writer.flush().context("failed to flush snapshot file")?;
            Ok(())
        })();

        if let Err(err) = result {
            // Remove by full path; the partial file is useless.
            if let Err(rm_err) = std::fs::remove_file(&path) {
                tracing::warn!(
                    path = %path.display(),
                    error = %rm_err,
                    "failed to delete partially written snapshot"
                );
            }
            return Err(err);
        }

        if let Err(err) = self.apply_retention() {
            tracing::warn!(error = %err, "snapshot retention cleanup failed");
        }

        Ok(path)
    }

    fn find_latest(&self) -> Result<Option<(PathBuf, u64)>> {
        if !self.dir.exists() {
            return Ok(None);
        }
        let snapshots = self.list()?;
        Ok(snapshots
            .into_iter()
            .max_by(|a, b| (a.1, &a.0).cmp(&(b.1, &b.0)))
            .map(|(path, _, last_seq)| (path, last_seq)))
    }

    fn restore(&self, path: &Path) -> KvResult<HashMap<String, String>> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut state = HashMap::new();

        loop {
            let payload = match codec::read_frame(&mut reader) {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(KvError::CorruptSnapshot {
                        path: path.display().to_string(),
                        reason: "truncated entry".to_string(),
                    });
                }
                Err(err) => return Err(err.into()),
            };
            let entry: SnapshotEntry =
                bincode::deserialize(&payload).map_err(|err| KvError::CorruptSnapshot {
                    path: path.display().to_string(),
                    reason: err.to_string(),
                })?;
            state.insert(entry.key, entry.value);
        }

        Ok(state)
    }
}

/// Keeps snapshots in a mutex-guarded map; used by tests and benchmarks
/// that exercise compaction without touching the filesystem.
pub struct MemorySnapshotter {
    snapshots: parking_lot::Mutex<Vec<(PathBuf, u64, HashMap<String, String>)>>,
}

impl MemorySnapshotter {
    pub fn new() -> Self {
        Self {
            snapshots: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemorySnapshotter {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshotter for MemorySnapshotter {
    fn create(&self, state: &HashMap<String, String>, last_seq: u64) -> Result<PathBuf> {
        let mut snapshots = self.snapshots.lock();
        let path = PathBuf::from(format!("mem.{}.{last_seq}", snapshots.len()));
        snapshots.push((path.clone(), last_seq, state.clone()));
        Ok(path)
    }

    fn find_latest(&self) -> Result<Option<(PathBuf, u64)>> {
        Ok(self
            .snapshots
            .lock()
            .last()
            .map(|(path, last_seq, _)| (path.clone(), *last_seq)))
    }

    fn restore(&self, path: &Path) -> KvResult<HashMap<String, String>> {
        self.snapshots
            .lock()
            .iter()
            .find(|(p, _, _)| p == path)
            .map(|(_, _, state)| state.clone())
            .ok_or_else(|| KvError::CorruptSnapshot {
                path: path.display().to_string(),
                reason: "unknown in-memory snapshot".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn state(n: usize) -> HashMap<String, String> {
        (0..n)
            .map(|i| (format!("key-{i}"), format!("val-{i}")))
            .collect()
    }

    #[test]
    fn create_then_restore_round_trips() {
        let dir = tempdir().unwrap();
        let snapshotter = FileSnapshotter::new(dir.path(), 4);

        let written = state(25);
        let path = snapshotter.create(&written, 77).unwrap();
        assert_eq!(snapshotter.restore(&path).unwrap(), written);
    }

    #[test]
    fn find_latest_picks_newest_timestamp() {
        let dir = tempdir().unwrap();
        let snapshotter = FileSnapshotter::new(dir.path(), 4);

        snapshotter.create(&state(1), 10).unwrap();
        snapshotter.create(&state(2), 20).unwrap();
        let newest = snapshotter.create(&state(3), 30).unwrap();

        let (path, last_seq) = snapshotter.find_latest().unwrap().unwrap();
        assert_eq!(path, newest);
        assert_eq!(last_seq, 30);
    }

    #[test]
    fn find_latest_on_empty_dir_is_none() {
        let dir = tempdir().unwrap();
        let snapshotter = FileSnapshotter::new(dir.path(), 4);
        assert!(snapshotter.find_latest().unwrap().is_none());
    }

    #[test]
    fn find_latest_on_missing_dir_is_none() {
        let snapshotter = FileSnapshotter::new("/nonexistent/snapshots", 4);
        assert!(snapshotter.find_latest().unwrap().is_none());
    }

    #[test]
    fn retention_keeps_newest_files() {
        let dir = tempdir().unwrap();
        let snapshotter = FileSnapshotter::new(dir.path(), 2);

        for seq in 1..=5 {
            snapshotter.create(&state(1), seq).unwrap();
        }

        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(remaining.len(), 2);

        let (_, last_seq) = snapshotter.find_latest().unwrap().unwrap();
        assert_eq!(last_seq, 5);
    }

    #[test]
    fn restore_rejects_undecodable_entry() {
        let dir = tempdir().unwrap();
        let snapshotter = FileSnapshotter::new(dir.path(), 4);

        let path = dir.path().join("snapshot.123.7.dat");
        let mut file = File::create(&path).unwrap();
        // Well-formed frame around garbage that is not a SnapshotEntry.
        codec::write_frame(&mut file, &[0xff; 3]).unwrap();

        let err = snapshotter.restore(&path).unwrap_err();
        assert!(matches!(err, KvError::CorruptSnapshot { .. }));
    }

    #[test]
    fn non_snapshot_files_are_ignored() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("snapshot.bogus.7.dat"), b"x").unwrap();

        let snapshotter = FileSnapshotter::new(dir.path(), 4);
        assert!(snapshotter.find_latest().unwrap().is_none());
    }
}
