//! Futures store.
//!
//! A client write returns only after its command has been applied, but
//! application happens asynchronously on the apply loop. The futures
//! store bridges the two: the request coordinator registers a future at
//! the command's log index and waits on it; the FSM adapter fulfills
//! that index when the entry is applied.
//!
//! Fulfillment can race registration in either order. `fulfill` on an
//! unregistered index creates the future already closed, so a later
//! `register` observes it fulfilled and returns without blocking.
//! Futures whose awaiter timed out are marked stale and left in place;
//! a periodic GC sweep reaps fulfilled and stale entries.

use crate::core::error::{KvError, KvResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

/// One-shot commit signal for a single log index.
///
/// Owned by the [`FuturesStore`]; awaiters hold a shared handle only
/// for the duration of their wait.
pub struct CommitFuture {
    done: watch::Sender<bool>,
    stale: AtomicBool,
}

impl CommitFuture {
    fn new(fulfilled: bool) -> Arc<Self> {
        let (done, _) = watch::channel(fulfilled);
        Arc::new(Self {
            done,
            stale: AtomicBool::new(false),
        })
    }

    /// Block until fulfillment or the deadline. A deadline expiry marks
    /// the future stale for the next GC sweep.
    pub async fn wait(&self, deadline: Duration) -> KvResult<()> {
        let mut rx = self.done.subscribe();
        let result = match tokio::time::timeout(deadline, rx.wait_for(|done| *done)).await {
            Ok(Ok(_)) => Ok(()),
            // The store holds the sender for the future's whole life,
            // so a closed channel can only mean the entry was swept.
            Ok(Err(_)) | Err(_) => {
                self.stale.store(true, Ordering::Release);
                Err(KvError::CommitTimeout)
            }
        };
        result
    }

    /// Whether the wait signal has been closed.
    pub fn is_fulfilled(&self) -> bool {
        *self.done.borrow()
    }

    /// Whether an awaiter timed out on this future.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    fn fulfill(&self) {
        self.done.send_replace(true);
    }
}

/// Map from log index to commit future.
pub struct FuturesStore {
    promises: Mutex<HashMap<i64, Arc<CommitFuture>>>,
}

impl FuturesStore {
    pub fn new() -> Self {
        Self {
            promises: Mutex::new(HashMap::new()),
        }
    }

    /// Future for `log_index`, creating a pending one if none exists.
    /// Two registrations for the same index return the same future; an
    /// index fulfilled before registration returns an already-closed
    /// future.
    pub fn register(&self, log_index: i64) -> Arc<CommitFuture> {
        let mut promises = self.promises.lock();
        Arc::clone(
            promises
                .entry(log_index)
                .or_insert_with(|| CommitFuture::new(false)),
        )
    }

    /// Close the wait signal for `log_index`. Idempotent; creates a
    /// pre-fulfilled future when the index was never registered.
    pub fn fulfill(&self, log_index: i64) {
        let mut promises = self.promises.lock();
        match promises.get(&log_index) {
            Some(promise) => promise.fulfill(),
            None => {
                promises.insert(log_index, CommitFuture::new(true));
            }
        }
    }

    /// Remove every fulfilled or stale future. Returns the number
    /// removed.
    pub fn sweep(&self) -> usize {
        let mut promises = self.promises.lock();
        let before = promises.len();
        promises.retain(|_, promise| !promise.is_fulfilled() && !promise.is_stale());
        before - promises.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.promises.lock().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.promises.lock().is_empty()
    }

    /// Spawn the periodic GC sweep.
    pub fn start_gc(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = self;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        tracing::info!("futures gc shutting down");
                        return;
                    }
                    _ = ticker.tick() => {
                        let removed = store.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, "swept settled commit futures");
                        }
                    }
                }
            }
        })
    }
}

impl Default for FuturesStore {
    fn default() -> Self {
        Self::new()
    }
}
