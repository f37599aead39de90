//! Sharded concurrent map.
//!
//! The key space is split across a fixed array of shards, each holding a
//! `HashMap` plus rebuild counters under its own reader-writer lock. The
//! shard array never changes size after construction; the shard for a
//! key is `shards[hash64(key) % len]`.
//!
//! Counters track churn since the last rebuild: `puts` and `deletes`
//! are monotonic, `max_size` is the high-water-mark of live entries.
//! `len(map) <= max_size` holds at all times; a rebuild resets the
//! counters to `(0, 0, len)`.

use crate::core::config::ShardsConfig;
use crate::engine::hasher::KeyHasher;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Fallback shard count when a caller passes zero.
pub const DEFAULT_SHARDS_COUNT: usize = 128;

struct ShardState {
    m: HashMap<String, String>,
    puts: u64,
    deletes: u64,
    max_size: usize,
}

/// One independently locked subset of the key space.
pub struct Shard {
    state: RwLock<ShardState>,
}

/// Counter snapshot of a single shard, taken under its read lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardStats {
    pub puts: u64,
    pub deletes: u64,
    pub max_size: usize,
    pub len: usize,
}

impl Shard {
    fn new() -> Self {
        Self {
            state: RwLock::new(ShardState {
                m: HashMap::new(),
                puts: 0,
                deletes: 0,
                max_size: 0,
            }),
        }
    }

    /// Whether tombstone density crossed the rebuild policy thresholds.
    pub fn needs_rebuild(&self, policy: &ShardsConfig) -> bool {
        let state = self.state.read();
        let total_ops = state.puts + state.deletes;
        state.deletes >= policy.min_deletes
            && state.m.len() <= (state.max_size as f64 * policy.sparse_ratio).floor() as usize
            && total_ops >= policy.min_ops_until_rebuild
    }

    /// Reallocate the underlying map to reclaim tombstone memory and
    /// reset the counters. Runs under the write lock so concurrent
    /// writers cannot slip between the copy and the swap.
    pub fn rebuild(&self) {
        let mut state = self.state.write();
        let mut fresh = HashMap::with_capacity(state.m.len());
        fresh.extend(state.m.drain());
        state.max_size = fresh.len();
        state.m = fresh;
        state.puts = 0;
        state.deletes = 0;
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ShardStats {
        let state = self.state.read();
        ShardStats {
            puts: state.puts,
            deletes: state.deletes,
            max_size: state.max_size,
            len: state.m.len(),
        }
    }
}

/// Concurrent string-to-string map with per-shard locks.
pub struct ShardedMap {
    shards: Vec<Shard>,
    hasher: Box<dyn KeyHasher>,
}

impl ShardedMap {
    /// Create a map with `shards_count` shards (clamped to the default
    /// when zero) routed by `hasher`.
    pub fn new(shards_count: usize, hasher: Box<dyn KeyHasher>) -> Self {
        let count = if shards_count == 0 {
            DEFAULT_SHARDS_COUNT
        } else {
            shards_count
        };
        Self {
            shards: (0..count).map(|_| Shard::new()).collect(),
            hasher,
        }
    }

    fn shard(&self, key: &str) -> &Shard {
        let idx = (self.hasher.sum64(key) % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    /// Insert or overwrite a key.
    pub fn put(&self, key: String, value: String) {
        let mut state = self.shard(&key).state.write();
        state.m.insert(key, value);
        state.puts += 1;
        state.max_size = state.max_size.max(state.m.len());
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.shard(key).state.read().m.get(key).cloned()
    }

    /// Remove a key. The delete counter advances only when the key was
    /// present, so the rebuild predicate tracks real tombstones.
    pub fn delete(&self, key: &str) {
        let mut state = self.shard(key).state.write();
        if state.m.remove(key).is_some() {
            state.deletes += 1;
        }
    }

    /// Total live entries. Shards are summed under individual read
    /// locks, so the result is approximate across concurrent writers.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.state.read().m.len())
            .sum()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full copy of the contents, shard by shard under read locks.
    /// No duplicates; cross-shard atomicity is not guaranteed.
    pub fn items(&self) -> HashMap<String, String> {
        let mut items = HashMap::with_capacity(self.len());
        for shard in &self.shards {
            let state = shard.state.read();
            items.extend(state.m.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        items
    }

    /// Replace the entire contents with `items` and reset all counters.
    /// Every shard's write lock is held for the swap, so readers never
    /// observe a half-restored map.
    pub fn restore(&self, items: HashMap<String, String>) {
        let mut routed: Vec<HashMap<String, String>> =
            (0..self.shards.len()).map(|_| HashMap::new()).collect();
        for (key, value) in items {
            let idx = (self.hasher.sum64(&key) % self.shards.len() as u64) as usize;
            routed[idx].insert(key, value);
        }

        let mut guards: Vec<_> = self.shards.iter().map(|s| s.state.write()).collect();
        for (guard, fresh) in guards.iter_mut().zip(routed) {
            guard.max_size = fresh.len();
            guard.m = fresh;
            guard.puts = 0;
            guard.deletes = 0;
        }
    }

    /// Run one rebuild sweep, rebuilding every shard whose counters
    /// cross the policy thresholds. Returns the number rebuilt.
    pub fn rebuild_sweep(&self, policy: &ShardsConfig) -> usize {
        let mut rebuilt = 0;
        for shard in &self.shards {
            if shard.needs_rebuild(policy) {
                shard.rebuild();
                rebuilt += 1;
            }
        }
        rebuilt
    }

    /// Number of shards.
    pub fn shards_count(&self) -> usize {
        self.shards.len()
    }

    /// Counter snapshot of shard `idx`.
    pub fn shard_stats(&self, idx: usize) -> ShardStats {
        self.shards[idx].stats()
    }
}
