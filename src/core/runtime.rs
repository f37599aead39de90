//! Runtime orchestration.
//!
//! Builds the component stack for the configured serving mode and owns
//! the shutdown sequence. Every background task shares one watch-based
//! cancel signal.
//!
//! Standalone start order: snapshotter → WAL recovery → WAL tasks →
//! shard supervisor → HTTP listener. Shutdown reverses it: stop
//! accepting requests, drain pending WAL writes, signal cancel (the
//! fsync ticker performs its final fsync with retries), join every
//! task, close the log file.
//!
//! Replicated mode swaps the WAL for the consensus module: the futures
//! store and FSM apply loop start before consensus so no committed
//! entry is ever missed, and any error on the consensus error channel
//! is fatal.

use crate::api::coordinator::{
    Coordinator, ReplicatedCoordinator, SizeLimits, StandaloneCoordinator,
};
use crate::api::{router, AppState};
use crate::core::config::{Config, Mode};
use crate::engine::KvEngine;
use crate::replica::fsm::FsmAdapter;
use crate::replica::futures::FuturesStore;
use crate::replica::raft::{ApplyMessage, Raft};
use crate::storage::snapshot::FileSnapshotter;
use crate::storage::wal::Wal;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Capacity of the apply channel between consensus and the FSM.
const APPLY_CHANNEL_CAPACITY: usize = 64;

/// Component lifecycle owner.
pub struct Runtime {
    config: Arc<Config>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Create a runtime over a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// The loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run until interrupted. Dispatches on the configured mode;
    /// replicated mode needs a consensus module injected through
    /// [`Runtime::run_replicated`].
    pub async fn run(self) -> Result<()> {
        match self.config.replication.mode {
            Mode::Standalone => self.run_standalone().await,
            Mode::Replicated => anyhow::bail!(
                "replicated mode requires a consensus module; \
                 embed tessera and call Runtime::run_replicated"
            ),
        }
    }

    /// Serve in standalone mode with WAL durability.
    pub async fn run_standalone(self) -> Result<()> {
        let config = &self.config;
        tracing::info!(mode = "standalone", "starting tessera runtime");

        let engine = Arc::new(KvEngine::new(&config.engine));

        std::fs::create_dir_all(&config.snapshots.dir).with_context(|| {
            format!("failed to create snapshots directory {}", config.snapshots.dir)
        })?;
        let snapshotter = Arc::new(FileSnapshotter::new(
            config.snapshots.dir.clone(),
            config.snapshots.max_snapshots,
        ));

        let wal = Arc::new(Wal::open(config.wal.clone(), snapshotter).context("failed to open wal")?);
        wal.recover(&engine).context("wal recovery failed")?;

        let (writer, fsyncer) = wal
            .start(self.shutdown_rx.clone())
            .context("failed to start wal tasks")?;
        let rebuilder =
            Arc::clone(&engine).start_rebuilder(config.shards.clone(), self.shutdown_rx.clone());

        let mut fatal_rx = wal
            .fatal_errors()
            .context("wal fatal-error channel already taken")?;

        let coordinator = Coordinator::Standalone(StandaloneCoordinator::new(
            SizeLimits::from(&config.engine),
            Arc::clone(&engine),
            Arc::clone(&wal),
        ));

        self.serve(coordinator, async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received interrupt, executing graceful shutdown");
                }
                Some(err) = fatal_rx.recv() => {
                    tracing::error!(error = %err, "wal failure, executing shutdown");
                }
            }
        })
        .await?;

        // Drain whatever is still queued before cancelling the tasks;
        // the fsyncer flushes once more on its way out.
        wal.wait_writings().await;
        let _ = self.shutdown_tx.send(true);
        writer.await.context("wal writer panicked")?;
        fsyncer.await.context("wal fsyncer panicked")?;
        rebuilder.await.context("shard supervisor panicked")?;
        wal.close();

        tracing::info!("tessera stopped");
        Ok(())
    }

    /// Serve in replicated mode. The consensus module is built by
    /// `raft_factory`, which receives the FSM adapter (for the
    /// snapshot/restore/read callbacks) and the sending side of the
    /// apply channel.
    pub async fn run_replicated<F>(self, raft_factory: F) -> Result<()>
    where
        F: FnOnce(Arc<FsmAdapter>, mpsc::Sender<ApplyMessage>) -> Result<Arc<dyn Raft>>,
    {
        let config = &self.config;
        tracing::info!(mode = "replicated", "starting tessera runtime");

        let engine = Arc::new(KvEngine::new(&config.engine));
        let futures = Arc::new(FuturesStore::new());

        let (apply_tx, apply_rx) = mpsc::channel(APPLY_CHANNEL_CAPACITY);
        let fsm = FsmAdapter::new(Arc::clone(&engine), Arc::clone(&futures));
        let raft = raft_factory(Arc::clone(&fsm), apply_tx)
            .context("failed to construct consensus module")?;

        // The apply loop must be draining before consensus starts so no
        // committed entry is ever missed.
        let apply_loop = Arc::clone(&fsm).start(apply_rx, self.shutdown_rx.clone());
        let gc = Arc::clone(&futures).start_gc(
            config.replication.futures_gc_period(),
            self.shutdown_rx.clone(),
        );
        let rebuilder =
            Arc::clone(&engine).start_rebuilder(config.shards.clone(), self.shutdown_rx.clone());

        raft.start().context("failed to start consensus module")?;
        let mut consensus_errors = raft
            .errors()
            .context("consensus error channel already taken")?;

        let coordinator = Coordinator::Replicated(ReplicatedCoordinator::new(
            SizeLimits::from(&config.engine),
            Arc::clone(&raft),
            Arc::clone(&futures),
            config.replication.public_addrs.clone(),
            config.server.request_timeout(),
        ));

        let fatal: Arc<parking_lot::Mutex<Option<anyhow::Error>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let fatal_slot = Arc::clone(&fatal);
        self.serve(coordinator, async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received interrupt, executing graceful shutdown");
                }
                Some(err) = consensus_errors.recv() => {
                    tracing::error!(error = %err, "critical consensus error, executing shutdown");
                    *fatal_slot.lock() = Some(err.context("critical consensus error"));
                }
            }
        })
        .await?;

        let _ = self.shutdown_tx.send(true);
        if let Err(err) = apply_loop.await.context("fsm apply loop panicked")? {
            tracing::error!(error = %err, "fsm apply loop terminated with error");
        }
        gc.await.context("futures gc panicked")?;
        rebuilder.await.context("shard supervisor panicked")?;
        raft.stop().context("failed to stop consensus module")?;

        tracing::info!("tessera stopped");
        let result = match fatal.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        result
    }

    async fn serve(
        &self,
        coordinator: Coordinator,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let state = Arc::new(AppState { coordinator });
        let app = router(state);

        let listener = tokio::net::TcpListener::bind(&self.config.server.bind)
            .await
            .with_context(|| format!("failed to bind {}", self.config.server.bind))?;
        tracing::info!(addr = %self.config.server.bind, "http listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .context("http server failed")
    }
}
