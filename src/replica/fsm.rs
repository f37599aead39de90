//! FSM adapter.
//!
//! Bridges the consensus module to the KV engine. A single apply-loop
//! task consumes committed entries from the apply channel in log order,
//! mutates the engine, and fulfills the commit future at each entry's
//! index. The consensus module calls back into [`Fsm::snapshot`],
//! [`Fsm::restore`], and [`Fsm::read`] for log truncation, snapshot
//! installation, and linearizable reads.
//!
//! A command that fails to decode is logged and skipped: the log is
//! replicated byte-for-byte, so every node skips the same entry and
//! replica determinism holds. A snapshot that fails to restore is
//! fatal.

use crate::core::error::{KvError, KvResult};
use crate::engine::KvEngine;
use crate::replica::command::Command;
use crate::replica::futures::FuturesStore;
use crate::replica::raft::{ApplyMessage, Fsm};
use crate::storage::codec;
use crate::storage::snapshot::SnapshotEntry;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// State machine over the KV engine.
pub struct FsmAdapter {
    engine: Arc<KvEngine>,
    futures: Arc<FuturesStore>,
    last_applied: AtomicI64,
}

impl FsmAdapter {
    pub fn new(engine: Arc<KvEngine>, futures: Arc<FuturesStore>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            futures,
            last_applied: AtomicI64::new(0),
        })
    }

    /// Log index of the most recently applied command.
    pub fn last_applied(&self) -> i64 {
        self.last_applied.load(Ordering::Acquire)
    }

    /// Spawn the apply loop. The returned handle resolves with an error
    /// only on a fatal condition (a snapshot that cannot be restored).
    pub fn start(
        self: Arc<Self>,
        mut apply_rx: mpsc::Receiver<ApplyMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<KvResult<()>> {
        let fsm = self;
        tokio::spawn(async move {
            tracing::info!("fsm apply loop started");
            loop {
                let msg = tokio::select! {
                    _ = shutdown.changed() => {
                        tracing::info!("fsm apply loop shutting down");
                        return Ok(());
                    }
                    msg = apply_rx.recv() => match msg {
                        Some(msg) => msg,
                        None => {
                            tracing::info!("apply channel closed, fsm apply loop exiting");
                            return Ok(());
                        }
                    },
                };

                if msg.command_valid {
                    fsm.apply_command(&msg.command);
                    fsm.last_applied.store(msg.command_index, Ordering::Release);
                    fsm.futures.fulfill(msg.command_index);
                }
                if msg.snapshot_valid {
                    if let Err(err) = Fsm::restore(fsm.as_ref(), &msg.snapshot) {
                        tracing::error!(error = %err, "failed to restore installed snapshot");
                        return Err(err);
                    }
                }
            }
        })
    }

    fn apply_command(&self, data: &[u8]) {
        let command = match Command::decode(data) {
            Ok(command) => command,
            Err(err) => {
                tracing::error!(error = %err, "skipping undecodable command");
                return;
            }
        };

        match command {
            Command::Put { key, value } => {
                tracing::debug!(key = %key, "applying put command");
                if let Err(err) = self.engine.put(key, value) {
                    tracing::error!(error = %err, "failed to apply put command");
                }
            }
            Command::Delete { key } => {
                tracing::debug!(key = %key, "applying delete command");
                if let Err(err) = self.engine.delete(&key) {
                    tracing::error!(error = %err, "failed to apply delete command");
                }
            }
        }
    }
}

impl Fsm for FsmAdapter {
    fn snapshot(&self) -> KvResult<(Vec<u8>, i64)> {
        let items = self.engine.items();
        let mut buf = BytesMut::new();
        for (key, value) in items {
            let entry = SnapshotEntry { key, value };
            let payload = bincode::serialize(&entry).map_err(|err| KvError::BadCommand {
                reason: err.to_string(),
            })?;
            codec::put_frame(&mut buf, &payload);
        }
        Ok((buf.freeze().to_vec(), self.last_applied()))
    }

    fn restore(&self, data: &[u8]) -> KvResult<()> {
        let mut buf = Bytes::copy_from_slice(data);
        let mut state = HashMap::new();
        loop {
            let payload = match codec::take_frame(&mut buf) {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(_) => {
                    return Err(KvError::CorruptSnapshot {
                        path: "<apply channel>".to_string(),
                        reason: "truncated snapshot frame".to_string(),
                    });
                }
            };
            let entry: SnapshotEntry =
                bincode::deserialize(&payload).map_err(|err| KvError::CorruptSnapshot {
                    path: "<apply channel>".to_string(),
                    reason: err.to_string(),
                })?;
            state.insert(entry.key, entry.value);
        }

        self.engine.restore(state);
        Ok(())
    }

    fn read(&self, query: &[u8]) -> KvResult<Vec<u8>> {
        let key = String::from_utf8_lossy(query);
        let value = self.engine.get(&key)?;
        Ok(value.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EngineConfig;

    fn fixture() -> (Arc<KvEngine>, Arc<FuturesStore>, Arc<FsmAdapter>) {
        let engine = Arc::new(KvEngine::new(&EngineConfig {
            max_key_size: 1024,
            max_value_size: 1024,
            shards_count: 8,
        }));
        let futures = Arc::new(FuturesStore::new());
        let fsm = FsmAdapter::new(Arc::clone(&engine), Arc::clone(&futures));
        (engine, futures, fsm)
    }

    #[tokio::test]
    async fn applies_commands_and_fulfills_futures() {
        let (engine, futures, fsm) = fixture();
        let (apply_tx, apply_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::clone(&fsm).start(apply_rx, shutdown_rx);

        let put = Command::Put {
            key: "testkey".into(),
            value: "testvalue".into(),
        };
        apply_tx
            .send(ApplyMessage::command(1, put.encode().unwrap()))
            .await
            .unwrap();

        let promise = futures.register(1);
        promise.wait(std::time::Duration::from_secs(5)).await.unwrap();
        assert_eq!(engine.get("testkey").unwrap(), "testvalue");
        assert_eq!(fsm.last_applied(), 1);

        let delete = Command::Delete {
            key: "testkey".into(),
        };
        apply_tx
            .send(ApplyMessage::command(2, delete.encode().unwrap()))
            .await
            .unwrap();
        futures
            .register(2)
            .wait(std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert!(engine.get("testkey").is_err());
        assert_eq!(fsm.last_applied(), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn undecodable_command_is_skipped_but_fulfilled() {
        let (engine, futures, fsm) = fixture();
        let (apply_tx, apply_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::clone(&fsm).start(apply_rx, shutdown_rx);

        apply_tx
            .send(ApplyMessage::command(1, vec![0xba, 0xad]))
            .await
            .unwrap();
        futures
            .register(1)
            .wait(std::time::Duration::from_secs(5))
            .await
            .unwrap();

        assert!(engine.is_empty());
        assert_eq!(fsm.last_applied(), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn snapshot_restore_round_trips() {
        let (engine, _futures, fsm) = fixture();
        for i in 0..20 {
            engine.put(format!("key-{i}"), format!("val-{i}")).unwrap();
        }
        let (bytes, _) = fsm.snapshot().unwrap();

        let (other_engine, _, other_fsm) = fixture();
        Fsm::restore(other_fsm.as_ref(), &bytes).unwrap();
        assert_eq!(other_engine.items(), engine.items());
    }

    #[tokio::test]
    async fn snapshot_message_restores_engine() {
        let (engine, futures, fsm) = fixture();
        let (donor_engine, _, donor_fsm) = fixture();
        donor_engine.put("k".into(), "v".into()).unwrap();
        let (bytes, _) = donor_fsm.snapshot().unwrap();

        let (apply_tx, apply_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::clone(&fsm).start(apply_rx, shutdown_rx);

        apply_tx.send(ApplyMessage::snapshot(bytes)).await.unwrap();
        // A trailing command proves the snapshot message was processed
        // once its future resolves.
        apply_tx
            .send(ApplyMessage::command(
                1,
                Command::Delete { key: "nope".into() }.encode().unwrap(),
            ))
            .await
            .unwrap();
        futures
            .register(1)
            .wait(std::time::Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(engine.get("k").unwrap(), "v");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_fatal() {
        let (_engine, _futures, fsm) = fixture();
        let (apply_tx, apply_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::clone(&fsm).start(apply_rx, shutdown_rx);

        let mut garbage = BytesMut::new();
        codec::put_frame(&mut garbage, &[0xff; 2]);
        apply_tx
            .send(ApplyMessage::snapshot(garbage.freeze().to_vec()))
            .await
            .unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, KvError::CorruptSnapshot { .. }));
    }

    #[tokio::test]
    async fn read_serves_value_bytes() {
        let (engine, _futures, fsm) = fixture();
        engine.put("k".into(), "v".into()).unwrap();
        assert_eq!(fsm.read(b"k").unwrap(), b"v");
        assert!(matches!(fsm.read(b"missing"), Err(KvError::NoSuchKey)));
    }
}
