//! Shard-routing hash.
//!
//! Routing only needs a fast, deterministic 64-bit hash that is stable
//! across restarts of the same binary; shard assignment is a local
//! decision, so cluster-wide stability is not required.

use std::hash::Hasher;
use twox_hash::XxHash64;

/// Hash seam for the shard router. Tests pin routing by substituting a
/// constant hasher.
pub trait KeyHasher: Send + Sync {
    /// 64-bit hash of the key bytes.
    fn sum64(&self, key: &str) -> u64;
}

/// xxhash64-based router hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct XxKeyHasher;

impl KeyHasher for XxKeyHasher {
    fn sum64(&self, key: &str) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(key.as_bytes());
        hasher.finish()
    }
}
