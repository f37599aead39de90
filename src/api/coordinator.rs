//! Request coordination.
//!
//! The coordinator turns a client request into engine effects for
//! whichever serving mode is active.
//!
//! Replicated writes: validate sizes, encode the command, submit it to
//! consensus, then register a commit future at the assigned log index
//! and wait for the apply loop to fulfill it. Non-leader submissions
//! resolve to a redirect carrying the leader's public address. If
//! leadership is lost while a client waits, no apply arrives for that
//! index and the wait expires at the request deadline; the client
//! retries against the redirected leader.
//!
//! Standalone writes append to the WAL and then mutate the engine
//! directly; reads come straight off the engine.

use crate::core::config::EngineConfig;
use crate::core::error::{KvError, KvResult};
use crate::engine::KvEngine;
use crate::replica::command::Command;
use crate::replica::futures::FuturesStore;
use crate::replica::raft::Raft;
use crate::storage::wal::Wal;
use std::sync::Arc;
use std::time::Duration;

/// Size limits applied before any other work; cheaper than a consensus
/// round-trip.
#[derive(Debug, Clone, Copy)]
pub struct SizeLimits {
    pub max_key_size: usize,
    pub max_value_size: usize,
}

impl From<&EngineConfig> for SizeLimits {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            max_key_size: cfg.max_key_size,
            max_value_size: cfg.max_value_size,
        }
    }
}

impl SizeLimits {
    fn check_key(&self, key: &str) -> KvResult<()> {
        if key.len() > self.max_key_size {
            return Err(KvError::KeyTooLarge {
                actual: key.len(),
                limit: self.max_key_size,
            });
        }
        Ok(())
    }

    fn check_value(&self, value: &str) -> KvResult<()> {
        if value.len() > self.max_value_size {
            return Err(KvError::ValueTooLarge {
                actual: value.len(),
                limit: self.max_value_size,
            });
        }
        Ok(())
    }
}

/// Mode-specific request handling behind one call surface.
pub enum Coordinator {
    Standalone(StandaloneCoordinator),
    Replicated(ReplicatedCoordinator),
}

impl Coordinator {
    pub async fn put(&self, key: String, value: String) -> KvResult<()> {
        match self {
            Self::Standalone(c) => c.put(key, value).await,
            Self::Replicated(c) => c.put(key, value).await,
        }
    }

    pub async fn get(&self, key: &str) -> KvResult<String> {
        match self {
            Self::Standalone(c) => c.get(key),
            Self::Replicated(c) => c.get(key).await,
        }
    }

    pub async fn delete(&self, key: String) -> KvResult<()> {
        match self {
            Self::Standalone(c) => c.delete(key).await,
            Self::Replicated(c) => c.delete(key).await,
        }
    }
}

/// Single-node coordination: WAL append then engine mutation.
pub struct StandaloneCoordinator {
    limits: SizeLimits,
    engine: Arc<KvEngine>,
    wal: Arc<Wal>,
}

impl StandaloneCoordinator {
    pub fn new(limits: SizeLimits, engine: Arc<KvEngine>, wal: Arc<Wal>) -> Self {
        Self {
            limits,
            engine,
            wal,
        }
    }

    pub async fn put(&self, key: String, value: String) -> KvResult<()> {
        self.limits.check_key(&key)?;
        self.limits.check_value(&value)?;
        self.wal.write_put(key.clone(), value.clone()).await?;
        self.engine.put(key, value)
    }

    pub fn get(&self, key: &str) -> KvResult<String> {
        self.engine.get(key)
    }

    pub async fn delete(&self, key: String) -> KvResult<()> {
        self.limits.check_key(&key)?;
        self.wal.write_delete(key.clone()).await?;
        self.engine.delete(&key)
    }
}

/// Cluster coordination through the consensus module.
pub struct ReplicatedCoordinator {
    limits: SizeLimits,
    raft: Arc<dyn Raft>,
    futures: Arc<FuturesStore>,
    public_addrs: Vec<String>,
    request_timeout: Duration,
}

impl ReplicatedCoordinator {
    pub fn new(
        limits: SizeLimits,
        raft: Arc<dyn Raft>,
        futures: Arc<FuturesStore>,
        public_addrs: Vec<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            limits,
            raft,
            futures,
            public_addrs,
            request_timeout,
        }
    }

    /// Map a non-leader verdict to a redirect, or to `NoLeader` when the
    /// reported id resolves to no known peer.
    fn not_leader(&self, leader_id: i32) -> KvError {
        usize::try_from(leader_id)
            .ok()
            .and_then(|id| self.public_addrs.get(id))
            .map(|addr| KvError::NotLeader {
                leader_addr: addr.clone(),
            })
            .unwrap_or(KvError::NoLeader)
    }

    async fn replicate(&self, command: Command) -> KvResult<()> {
        let data = command.encode()?;
        let result = self.raft.submit(data);
        if !result.is_leader {
            return Err(self.not_leader(result.leader_id));
        }

        let promise = self.futures.register(result.log_index);
        promise.wait(self.request_timeout).await
    }

    pub async fn put(&self, key: String, value: String) -> KvResult<()> {
        self.limits.check_key(&key)?;
        self.limits.check_value(&value)?;
        self.replicate(Command::Put { key, value }).await
    }

    pub async fn delete(&self, key: String) -> KvResult<()> {
        self.limits.check_key(&key)?;
        self.replicate(Command::Delete { key }).await
    }

    pub async fn get(&self, key: &str) -> KvResult<String> {
        let read = self.raft.read_only(key.as_bytes());
        let result = match tokio::time::timeout(self.request_timeout, read).await {
            Ok(result) => result?,
            Err(_) => return Err(KvError::ReadTimeout),
        };

        if !result.is_leader {
            return Err(self.not_leader(result.leader_id));
        }
        Ok(String::from_utf8_lossy(&result.data).into_owned())
    }
}
