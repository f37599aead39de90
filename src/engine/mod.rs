//! Sharded in-memory KV engine.
//!
//! The engine is a thin policy layer over the sharded map: size limits,
//! typed errors, snapshot export/import, and the rebuild supervisor.
//! Every state mutation in the system, whether from a client request in
//! standalone mode or a committed Raft entry, flows through here.

pub mod hasher;
pub mod shard;
pub mod supervisor;

use crate::core::config::{EngineConfig, ShardsConfig};
use crate::core::error::{KvError, KvResult};
use crate::engine::hasher::{KeyHasher, XxKeyHasher};
use crate::engine::shard::ShardedMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Size-limit policy over a [`ShardedMap`].
pub struct KvEngine {
    max_key_size: usize,
    max_value_size: usize,
    map: ShardedMap,
}

impl KvEngine {
    /// Create an engine with the default xxhash router.
    pub fn new(cfg: &EngineConfig) -> Self {
        Self::with_hasher(cfg, Box::new(XxKeyHasher))
    }

    /// Create an engine with a custom router hash.
    pub fn with_hasher(cfg: &EngineConfig, hasher: Box<dyn KeyHasher>) -> Self {
        Self {
            max_key_size: cfg.max_key_size,
            max_value_size: cfg.max_value_size,
            map: ShardedMap::new(cfg.shards_count, hasher),
        }
    }

    /// Insert or overwrite a key after validating both sizes.
    pub fn put(&self, key: String, value: String) -> KvResult<()> {
        if key.len() > self.max_key_size {
            return Err(KvError::KeyTooLarge {
                actual: key.len(),
                limit: self.max_key_size,
            });
        }
        if value.len() > self.max_value_size {
            return Err(KvError::ValueTooLarge {
                actual: value.len(),
                limit: self.max_value_size,
            });
        }
        self.map.put(key, value);
        Ok(())
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> KvResult<String> {
        self.map.get(key).ok_or(KvError::NoSuchKey)
    }

    /// Remove a key. Deleting an absent key is a successful no-op.
    pub fn delete(&self, key: &str) -> KvResult<()> {
        self.map.delete(key);
        Ok(())
    }

    /// Total live entries, approximate across concurrent writers.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the engine holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Full copy of the contents, used for snapshotting.
    pub fn items(&self) -> HashMap<String, String> {
        self.map.items()
    }

    /// Replace the entire contents, used by snapshot restore.
    pub fn restore(&self, items: HashMap<String, String>) {
        self.map.restore(items);
    }

    /// Spawn the shard rebuild supervisor bound to this engine.
    pub fn start_rebuilder(
        self: Arc<Self>,
        policy: ShardsConfig,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        supervisor::spawn(self, policy, shutdown)
    }

    /// The underlying sharded map.
    pub fn map(&self) -> &ShardedMap {
        &self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(max_key: usize, max_value: usize) -> KvEngine {
        KvEngine::new(&EngineConfig {
            max_key_size: max_key,
            max_value_size: max_value,
            shards_count: 8,
        })
    }

    #[test]
    fn put_get_delete_cycle() {
        let e = engine(1024, 1024);
        e.put("testkey".into(), "testvalue".into()).unwrap();
        assert_eq!(e.get("testkey").unwrap(), "testvalue");

        e.delete("testkey").unwrap();
        assert!(matches!(e.get("testkey"), Err(KvError::NoSuchKey)));
    }

    #[test]
    fn oversize_key_is_rejected_without_mutation() {
        let e = engine(10, 20);
        let err = e.put("thiskeyistoolarge".into(), "x".into()).unwrap_err();
        assert!(matches!(err, KvError::KeyTooLarge { actual: 17, limit: 10 }));
        assert!(e.is_empty());
    }

    #[test]
    fn oversize_value_is_rejected_without_mutation() {
        let e = engine(10, 20);
        let err = e
            .put("k".into(), "thisvalueistoolargetoomuch".into())
            .unwrap_err();
        assert!(matches!(err, KvError::ValueTooLarge { limit: 20, .. }));
        assert!(e.is_empty());
    }

    #[test]
    fn delete_absent_key_succeeds() {
        let e = engine(1024, 1024);
        e.delete("never-there").unwrap();
    }

    #[test]
    fn items_and_restore_round_trip() {
        let e = engine(1024, 1024);
        for i in 0..32 {
            e.put(format!("key-{i}"), format!("val-{i}")).unwrap();
        }
        let exported = e.items();

        let other = engine(1024, 1024);
        other.restore(exported.clone());
        assert_eq!(other.items(), exported);
        assert_eq!(other.len(), 32);
    }
}
