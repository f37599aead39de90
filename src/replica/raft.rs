//! Consensus collaborator contract.
//!
//! Tessera consumes an external Raft implementation; this module pins
//! down exactly the surface the core relies on. The consensus side
//! drives the [`Fsm`] callbacks (snapshot, restore, linearizable read)
//! and delivers committed entries on the apply channel; the core calls
//! [`Raft::submit`] and [`Raft::read_only`] and watches the error
//! channel for fatal consensus failures.

use crate::core::error::KvResult;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Outcome of submitting a command to the consensus log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitResult {
    /// Whether this node was the leader at submission time.
    pub is_leader: bool,
    /// Raft id of the current leader, or a negative value when unknown.
    pub leader_id: i32,
    /// Log index assigned to the command when `is_leader`.
    pub log_index: i64,
}

/// Outcome of a linearizable read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOnlyResult {
    /// Whether this node was the leader when the read barrier completed.
    pub is_leader: bool,
    /// Raft id of the current leader, or a negative value when unknown.
    pub leader_id: i32,
    /// Response bytes produced by [`Fsm::read`].
    pub data: Vec<u8>,
}

/// Current term and leadership posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaftState {
    pub term: i64,
    pub is_leader: bool,
}

/// One message on the apply channel. Exactly one of the two `*_valid`
/// flags is set.
#[derive(Debug, Clone)]
pub struct ApplyMessage {
    pub command_valid: bool,
    pub command: Vec<u8>,
    pub command_index: i64,
    pub snapshot_valid: bool,
    pub snapshot: Vec<u8>,
}

impl ApplyMessage {
    /// A committed command at `index`.
    pub fn command(index: i64, command: Vec<u8>) -> Self {
        Self {
            command_valid: true,
            command,
            command_index: index,
            snapshot_valid: false,
            snapshot: Vec::new(),
        }
    }

    /// An installed snapshot to restore from.
    pub fn snapshot(snapshot: Vec<u8>) -> Self {
        Self {
            command_valid: false,
            command: Vec::new(),
            command_index: 0,
            snapshot_valid: true,
            snapshot,
        }
    }
}

/// The consensus module surface the core consumes.
#[async_trait]
pub trait Raft: Send + Sync {
    /// Submit a command for replication. Non-blocking; commitment is
    /// observed later through the apply channel.
    fn submit(&self, command: Vec<u8>) -> SubmitResult;

    /// Perform a linearizable read; the consensus module invokes
    /// [`Fsm::read`] once the read barrier is established.
    async fn read_only(&self, query: &[u8]) -> KvResult<ReadOnlyResult>;

    /// Current term and leadership.
    fn state(&self) -> RaftState;

    /// Hand a state-machine snapshot to the consensus module so it can
    /// truncate its log up to `index`.
    fn snapshot(&self, index: i64, snapshot: Vec<u8>) -> Result<()>;

    /// Take the fatal-error receiver. Any error delivered on it is
    /// terminal for the process. Yields `None` after the first call.
    fn errors(&self) -> Option<mpsc::Receiver<anyhow::Error>>;

    /// Start consensus participation.
    fn start(&self) -> Result<()>;

    /// Stop consensus participation.
    fn stop(&self) -> Result<()>;
}

/// State-machine callbacks the consensus module drives.
pub trait Fsm: Send + Sync {
    /// Serialize the full applied state; returns the bytes and the
    /// last applied log index. Called under a consistency barrier the
    /// consensus module controls.
    fn snapshot(&self) -> KvResult<(Vec<u8>, i64)>;

    /// Replace the applied state from snapshot bytes.
    fn restore(&self, data: &[u8]) -> KvResult<()>;

    /// Serve a linearizable read; `query` is a key, the response is the
    /// value bytes.
    fn read(&self, query: &[u8]) -> KvResult<Vec<u8>>;
}
