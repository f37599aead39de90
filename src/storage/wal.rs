//! Write-ahead log.
//!
//! The WAL is the durability substrate in standalone mode. Writers
//! enqueue records onto a bounded channel; a single writer task assigns
//! strictly monotonic ids and appends length-prefixed records to the
//! log file. A separate ticker fsyncs the file periodically and performs
//! a final fsync with retries on shutdown.
//!
//! When the file grows past the configured size, the writer triggers an
//! asynchronous compaction: the log is closed and renamed to
//! `<name>.compacting`, a fresh log opens at the original name, and the
//! renamed file is folded into the latest snapshot. New appends proceed
//! concurrently; only records durable before the rename appear in the
//! new snapshot.
//!
//! Crash recovery restores the latest snapshot and replays every log
//! record with an id above the snapshot's sequence. A partial trailing
//! record (torn write) is discarded; a record that frames correctly but
//! fails to decode aborts recovery.

use crate::core::config::WalConfig;
use crate::core::error::{KvError, KvResult};
use crate::engine::KvEngine;
use crate::storage::codec;
use crate::storage::snapshot::Snapshotter;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

/// Capacity of the append channel between callers and the writer task.
const APPEND_QUEUE_CAPACITY: usize = 16;

/// Back-off between compaction attempts after a failure.
const COMPACTION_RETRY_IN: Duration = Duration::from_secs(5);

/// Operation carried by a log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOp {
    /// Key-value write.
    Put { key: String, value: String },
    /// Key removal.
    Delete { key: String },
}

/// One durable log record. Ids increase by one across a well-formed log;
/// the first record after a restore has `id = snapshot.last_seq + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: u64,
    pub op: LogOp,
}

/// Counter of enqueued-but-not-yet-written records, with a notify for
/// the shutdown drain barrier.
struct PendingWrites {
    count: AtomicU64,
    drained: Notify,
}

impl PendingWrites {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            drained: Notify::new(),
        }
    }

    fn add(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    async fn wait(&self) {
        let mut notified = pin!(self.drained.notified());
        loop {
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.as_mut().enable();
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.as_mut().await;
            notified.set(self.drained.notified());
        }
    }
}

/// The log file plus its path, swapped atomically during rotation.
struct WalFile {
    path: PathBuf,
    file: Option<File>,
}

impl WalFile {
    fn open(path: &Path) -> Result<Self> {
        let file = open_log(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    fn file(&mut self) -> std::io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("wal file is closed"))
    }

    fn size(&mut self) -> std::io::Result<u64> {
        Ok(self.file()?.metadata()?.len())
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.file()?.sync_all()
    }
}

fn open_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("failed to open wal file {}", path.display()))
}

/// State shared between the public handle and the spawned tasks.
struct WalShared {
    cfg: WalConfig,
    file: Mutex<WalFile>,
    last_seq: AtomicU64,
    pending: PendingWrites,
    is_snapshotting: AtomicBool,
    snapshot_done: Notify,
    snapshotter: Arc<dyn Snapshotter>,
    fatal_tx: mpsc::Sender<KvError>,
}

/// Append-only transaction log with snapshot compaction.
pub struct Wal {
    shared: Arc<WalShared>,
    append_tx: mpsc::Sender<LogOp>,
    append_rx: Mutex<Option<mpsc::Receiver<LogOp>>>,
    fatal_rx: Mutex<Option<mpsc::Receiver<KvError>>>,
}

impl Wal {
    /// Open (creating if absent) the log file named by `cfg`.
    pub fn open(cfg: WalConfig, snapshotter: Arc<dyn Snapshotter>) -> Result<Self> {
        let path = PathBuf::from(&cfg.log_file);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create wal directory {}", parent.display())
                })?;
            }
        }
        let file = WalFile::open(&path)?;

        let (append_tx, append_rx) = mpsc::channel(APPEND_QUEUE_CAPACITY);
        let (fatal_tx, fatal_rx) = mpsc::channel(1);

        Ok(Self {
            shared: Arc::new(WalShared {
                cfg,
                file: Mutex::new(file),
                last_seq: AtomicU64::new(0),
                pending: PendingWrites::new(),
                is_snapshotting: AtomicBool::new(false),
                snapshot_done: Notify::new(),
                snapshotter,
                fatal_tx,
            }),
            append_tx,
            append_rx: Mutex::new(Some(append_rx)),
            fatal_rx: Mutex::new(Some(fatal_rx)),
        })
    }

    /// Restore the engine from the latest snapshot plus log replay.
    /// Must run before [`Wal::start`].
    pub fn recover(&self, engine: &KvEngine) -> KvResult<()> {
        let mut last_seq = 0u64;
        let latest = self
            .shared
            .snapshotter
            .find_latest()
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        if let Some((path, snapshot_seq)) = latest {
            tracing::debug!(path = %path.display(), "restoring from snapshot");
            let state = self.shared.snapshotter.restore(&path)?;
            engine.restore(state);
            last_seq = snapshot_seq;
        }
        let snapshot_seq = last_seq;

        let path = self.shared.file.lock().path.clone();
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);
        loop {
            let payload = match codec::read_frame(&mut reader) {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::warn!("discarding partial trailing wal record");
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            let record: LogRecord =
                bincode::deserialize(&payload).map_err(|err| KvError::CorruptWal {
                    last_good_id: last_seq,
                    reason: err.to_string(),
                })?;

            if record.id > snapshot_seq {
                let applied = match record.op {
                    LogOp::Put { key, value } => engine.put(key, value),
                    LogOp::Delete { ref key } => engine.delete(key),
                };
                if let Err(err) = applied {
                    tracing::error!(id = record.id, error = %err, "failed to replay wal record");
                    break;
                }
            }
            last_seq = record.id;
        }

        self.shared.last_seq.store(last_seq, Ordering::Release);
        tracing::info!(last_seq, "wal recovery complete");
        Ok(())
    }

    /// Spawn the writer task and the fsync ticker. Returns their join
    /// handles for shutdown coordination. Errors when called twice.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Result<(JoinHandle<()>, JoinHandle<()>)> {
        let append_rx = self
            .append_rx
            .lock()
            .take()
            .context("wal writer already started")?;
        let writer = tokio::spawn(run_writer(
            Arc::clone(&self.shared),
            append_rx,
            shutdown.clone(),
        ));
        let fsyncer = tokio::spawn(run_fsyncer(Arc::clone(&self.shared), shutdown));
        Ok((writer, fsyncer))
    }

    /// Enqueue a put record. The write is durable once the writer task
    /// has appended it and the fsync ticker has synced.
    pub async fn write_put(&self, key: String, value: String) -> KvResult<()> {
        self.append(LogOp::Put { key, value }).await
    }

    /// Enqueue a delete record.
    pub async fn write_delete(&self, key: String) -> KvResult<()> {
        self.append(LogOp::Delete { key }).await
    }

    async fn append(&self, op: LogOp) -> KvResult<()> {
        self.shared.pending.add();
        if self.append_tx.send(op).await.is_err() {
            self.shared.pending.done();
            return Err(KvError::Io(std::io::Error::other(
                "wal writer has terminated",
            )));
        }
        Ok(())
    }

    /// Block until every enqueued record has been written.
    pub async fn wait_writings(&self) {
        self.shared.pending.wait().await;
    }

    /// Block until no compaction is in progress.
    pub async fn wait_snapshots(&self) {
        let shared = &self.shared;
        let mut notified = pin!(shared.snapshot_done.notified());
        loop {
            if !shared.is_snapshotting.load(Ordering::Acquire) {
                return;
            }
            notified.as_mut().enable();
            if !shared.is_snapshotting.load(Ordering::Acquire) {
                return;
            }
            notified.as_mut().await;
            notified.set(shared.snapshot_done.notified());
        }
    }

    /// Whether a compaction is currently running.
    pub fn is_snapshotting(&self) -> bool {
        self.shared.is_snapshotting.load(Ordering::Acquire)
    }

    /// Id of the most recently written record.
    pub fn last_seq(&self) -> u64 {
        self.shared.last_seq.load(Ordering::Acquire)
    }

    /// Take the fatal-error receiver. Any error delivered on it means
    /// the writer has terminated and the process should shut down.
    pub fn fatal_errors(&self) -> Option<mpsc::Receiver<KvError>> {
        self.fatal_rx.lock().take()
    }

    /// Close the log file. Call after the tasks have been joined.
    pub fn close(&self) {
        self.shared.file.lock().file.take();
    }
}

/// Single-consumer append loop. Assigns ids, frames records onto the
/// file, and triggers compaction when the file outgrows its budget.
async fn run_writer(
    shared: Arc<WalShared>,
    mut append_rx: mpsc::Receiver<LogOp>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let op = tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("wal writer shutting down");
                return;
            }
            op = append_rx.recv() => match op {
                Some(op) => op,
                None => return,
            },
        };

        let id = shared.last_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let record = LogRecord { id, op };
        let payload = match bincode::serialize(&record) {
            Ok(payload) => payload,
            Err(err) => {
                shared.pending.done();
                fatal(&shared, KvError::Io(std::io::Error::other(err.to_string())));
                return;
            }
        };

        let write_result = {
            let mut wal_file = shared.file.lock();
            let written = wal_file
                .file()
                .and_then(|file| codec::write_frame(file, &payload));
            match written {
                Ok(()) => wal_file.size(),
                Err(err) => Err(err),
            }
        };

        match write_result {
            Ok(size) => {
                // Checking the size on every append is cheap: the file
                // metadata is cached by the OS.
                if size >= shared.cfg.max_size_bytes
                    && shared
                        .is_snapshotting
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    tokio::spawn(run_snapshot_supervisor(Arc::clone(&shared)));
                }
                shared.pending.done();
            }
            Err(err) => {
                shared.pending.done();
                fatal(&shared, KvError::Io(err));
                return;
            }
        }
    }
}

fn fatal(shared: &WalShared, err: KvError) {
    tracing::error!(error = %err, "wal writer failed, terminating");
    let _ = shared.fatal_tx.try_send(err);
}

/// Periodic fsync plus the final flush with retries on shutdown.
async fn run_fsyncer(shared: Arc<WalShared>, mut shutdown: watch::Receiver<bool>) {
    let period = shared.cfg.fsync_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("fsyncer shutting down, starting final fsync");
                final_fsync_with_retries(&shared).await;
                return;
            }
            _ = ticker.tick() => {
                if let Err(err) = shared.file.lock().sync() {
                    tracing::warn!(error = %err, "failed to fsync wal file");
                }
            }
        }
    }
}

async fn final_fsync_with_retries(shared: &WalShared) {
    for attempt in 1..=shared.cfg.fsync_retries {
        let result = shared.file.lock().sync();
        match result {
            Ok(()) => {
                tracing::info!("final fsync complete, fsyncer stopped");
                return;
            }
            Err(err) => {
                tracing::warn!(attempt, error = %err, "final fsync attempt failed");
                if attempt == shared.cfg.fsync_retries {
                    tracing::error!("giving up on final fsync, fsyncer stopped");
                    return;
                }
                tokio::time::sleep(shared.cfg.fsync_retry()).await;
            }
        }
    }
}

/// Drives one compaction to completion, retrying on a fixed back-off.
/// Exactly one supervisor is live at a time; the `is_snapshotting` flag
/// is cleared only when it exits.
async fn run_snapshot_supervisor(shared: Arc<WalShared>) {
    tracing::info!("starting wal compaction supervisor");
    loop {
        match compact_once(&shared) {
            Ok(last_seq) => {
                tracing::info!(last_seq, "wal compaction complete, supervisor exiting");
                break;
            }
            Err(err) => {
                tracing::error!(error = %err, "wal compaction attempt failed, retrying after back-off");
                tokio::time::sleep(COMPACTION_RETRY_IN).await;
            }
        }
    }
    shared.is_snapshotting.store(false, Ordering::Release);
    shared.snapshot_done.notify_waiters();
}

/// One compaction attempt: fold the rotated log into the latest
/// snapshot and write a new snapshot at the highest id observed.
fn compact_once(shared: &WalShared) -> Result<u64> {
    let mut state = match shared
        .snapshotter
        .find_latest()
        .context("failed to find latest snapshot for compaction")?
    {
        Some((path, _)) => shared
            .snapshotter
            .restore(&path)
            .context("failed to restore latest snapshot for compaction")?,
        None => HashMap::new(),
    };

    let compacting_path = rotate_log(shared)?;

    let last_seq = fold_log_into_state(&compacting_path, &mut state)
        .context("failed to fold rotated wal into state")?;

    shared
        .snapshotter
        .create(&state, last_seq)
        .context("failed to create compaction snapshot")?;

    if let Err(err) = std::fs::remove_file(&compacting_path) {
        tracing::error!(
            path = %compacting_path.display(),
            error = %err,
            "failed to remove compacted wal"
        );
    }

    Ok(last_seq)
}

/// Under the file lock: close the live log, rename it aside, and open a
/// fresh one at the original name. Appends resume on the new file the
/// moment the lock releases.
fn rotate_log(shared: &WalShared) -> Result<PathBuf> {
    let mut wal_file = shared.file.lock();
    let live_path = wal_file.path.clone();
    let compacting_path = PathBuf::from(format!("{}.compacting", live_path.display()));

    wal_file.file.take();
    if let Err(err) = std::fs::rename(&live_path, &compacting_path) {
        // Put the original file back so appends can continue.
        wal_file.file = Some(open_log(&live_path)?);
        return Err(err).with_context(|| {
            format!("failed to rename wal for compaction {}", live_path.display())
        });
    }

    let fresh = open_log(&live_path)
        .with_context(|| format!("failed to reopen wal after rotation {}", live_path.display()))?;
    wal_file.file = Some(fresh);
    Ok(compacting_path)
}

/// Replay a rotated log file into `state`, returning the highest record
/// id observed.
fn fold_log_into_state(path: &Path, state: &mut HashMap<String, String>) -> Result<u64> {
    let file =
        File::open(path).with_context(|| format!("failed to open rotated wal {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut last_seq = 0u64;

    loop {
        let payload = match codec::read_frame(&mut reader) {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::warn!("discarding partial trailing record in rotated wal");
                break;
            }
            Err(err) => return Err(err).context("failed to read rotated wal record"),
        };
        let record: LogRecord =
            bincode::deserialize(&payload).context("failed to decode rotated wal record")?;

        last_seq = last_seq.max(record.id);
        match record.op {
            LogOp::Put { key, value } => {
                state.insert(key, value);
            }
            LogOp::Delete { key } => {
                state.remove(&key);
            }
        }
    }

    Ok(last_seq)
}
