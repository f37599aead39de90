//! Common test utilities.
//!
//! Shared helpers for integration tests. Import with `mod common;` in
//! test files.

#![allow(dead_code)] // Not every helper is used by every test binary.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tessera::core::config::EngineConfig;
use tessera::core::error::KvResult;
use tessera::engine::KvEngine;
use tessera::replica::fsm::FsmAdapter;
use tessera::replica::futures::FuturesStore;
use tessera::replica::raft::{
    ApplyMessage, Fsm, Raft, RaftState, ReadOnlyResult, SubmitResult,
};
use tokio::sync::mpsc;

/// Engine with roomy limits for integration tests.
pub fn test_engine() -> Arc<KvEngine> {
    Arc::new(KvEngine::new(&EngineConfig {
        max_key_size: 1024,
        max_value_size: 1024,
        shards_count: 8,
    }))
}

/// Engine with the tight limits used by oversize-rejection scenarios.
pub fn tiny_engine() -> Arc<KvEngine> {
    Arc::new(KvEngine::new(&EngineConfig {
        max_key_size: 10,
        max_value_size: 20,
        shards_count: 8,
    }))
}

/// Stub consensus module.
///
/// A leader stub assigns consecutive log indexes and feeds committed
/// commands straight onto the apply channel, so the FSM adapter and
/// futures store run exactly as they do against real consensus. Reads
/// go through [`Fsm::read`] the way the consensus module would drive
/// them. A follower stub only reports the leader id.
pub struct StubRaft {
    fsm: Arc<FsmAdapter>,
    apply_tx: mpsc::Sender<ApplyMessage>,
    is_leader: bool,
    leader_id: i32,
    next_index: AtomicI64,
    errors_rx: Mutex<Option<mpsc::Receiver<anyhow::Error>>>,
}

impl StubRaft {
    pub fn new(
        fsm: Arc<FsmAdapter>,
        apply_tx: mpsc::Sender<ApplyMessage>,
        is_leader: bool,
        leader_id: i32,
    ) -> Arc<Self> {
        let (_errors_tx, errors_rx) = mpsc::channel(1);
        Arc::new(Self {
            fsm,
            apply_tx,
            is_leader,
            leader_id,
            next_index: AtomicI64::new(0),
            errors_rx: Mutex::new(Some(errors_rx)),
        })
    }
}

#[async_trait]
impl Raft for StubRaft {
    fn submit(&self, command: Vec<u8>) -> SubmitResult {
        if !self.is_leader {
            return SubmitResult {
                is_leader: false,
                leader_id: self.leader_id,
                log_index: 0,
            };
        }

        let log_index = self.next_index.fetch_add(1, Ordering::AcqRel) + 1;
        // A dropped receiver models a leadership loss: the command gets
        // an index but no apply ever arrives.
        let _ = self
            .apply_tx
            .try_send(ApplyMessage::command(log_index, command));

        SubmitResult {
            is_leader: true,
            leader_id: self.leader_id,
            log_index,
        }
    }

    async fn read_only(&self, query: &[u8]) -> KvResult<ReadOnlyResult> {
        if !self.is_leader {
            return Ok(ReadOnlyResult {
                is_leader: false,
                leader_id: self.leader_id,
                data: Vec::new(),
            });
        }
        let data = self.fsm.read(query)?;
        Ok(ReadOnlyResult {
            is_leader: true,
            leader_id: self.leader_id,
            data,
        })
    }

    fn state(&self) -> RaftState {
        RaftState {
            term: 1,
            is_leader: self.is_leader,
        }
    }

    fn snapshot(&self, _index: i64, _snapshot: Vec<u8>) -> anyhow::Result<()> {
        Ok(())
    }

    fn errors(&self) -> Option<mpsc::Receiver<anyhow::Error>> {
        self.errors_rx.lock().take()
    }

    fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A running replica stack: engine, futures store, FSM apply loop, and
/// a stub consensus module in the given leadership posture.
pub struct ReplicaHarness {
    pub engine: Arc<KvEngine>,
    pub futures: Arc<FuturesStore>,
    pub fsm: Arc<FsmAdapter>,
    pub raft: Arc<StubRaft>,
    pub shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl ReplicaHarness {
    pub fn leader(engine: Arc<KvEngine>) -> Self {
        Self::new(engine, true, 0)
    }

    pub fn follower(engine: Arc<KvEngine>, leader_id: i32) -> Self {
        Self::new(engine, false, leader_id)
    }

    fn new(engine: Arc<KvEngine>, is_leader: bool, leader_id: i32) -> Self {
        let futures = Arc::new(FuturesStore::new());
        let fsm = FsmAdapter::new(Arc::clone(&engine), Arc::clone(&futures));
        let (apply_tx, apply_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        Arc::clone(&fsm).start(apply_rx, shutdown_rx);
        let raft = StubRaft::new(Arc::clone(&fsm), apply_tx, is_leader, leader_id);
        Self {
            engine,
            futures,
            fsm,
            raft,
            shutdown_tx,
        }
    }
}
