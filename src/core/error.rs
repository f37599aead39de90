//! Error types and classification.
//!
//! Tessera defines one domain error enum covering every condition the
//! request path can surface. Transport layers map these onto their own
//! status vocabulary; the predicates on [`KvError`] tell them which
//! family a value belongs to without matching every variant.

use thiserror::Error;

/// Common Tessera error conditions.
#[derive(Debug, Error)]
pub enum KvError {
    /// Key exceeds the configured maximum size.
    #[error("key too large: {actual} bytes exceeds limit of {limit}")]
    KeyTooLarge { actual: usize, limit: usize },

    /// Value exceeds the configured maximum size.
    #[error("value too large: {actual} bytes exceeds limit of {limit}")]
    ValueTooLarge { actual: usize, limit: usize },

    /// Read of an absent key.
    #[error("no such key")]
    NoSuchKey,

    /// This node is not the leader; the request belongs at `leader_addr`.
    #[error("not the leader, current leader at {leader_addr}")]
    NotLeader { leader_addr: String },

    /// No leader is currently known to the cluster.
    #[error("no leader available")]
    NoLeader,

    /// A commit future was not fulfilled within the request deadline.
    #[error("commit wait timed out")]
    CommitTimeout,

    /// A linearizable read did not complete within the request deadline.
    #[error("read timed out")]
    ReadTimeout,

    /// A WAL record framed correctly but its payload failed to decode.
    #[error("corrupt WAL record after id {last_good_id}: {reason}")]
    CorruptWal { last_good_id: u64, reason: String },

    /// A snapshot file entry failed to decode.
    #[error("corrupt snapshot {path}: {reason}")]
    CorruptSnapshot { path: String, reason: String },

    /// A replicated command failed to decode.
    #[error("undecodable command: {reason}")]
    BadCommand { reason: String },

    /// Filesystem failure on the durability path.
    #[error("storage i/o error")]
    Io(#[from] std::io::Error),
}

impl KvError {
    /// Whether the client may retry the same request unchanged.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::NoLeader | Self::CommitTimeout | Self::ReadTimeout
        )
    }

    /// Whether the request was rejected before any state mutation.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::KeyTooLarge { .. } | Self::ValueTooLarge { .. })
    }

    /// Whether this condition indicates damaged on-disk state. Corruption
    /// is fatal during startup recovery.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptWal { .. } | Self::CorruptSnapshot { .. } | Self::BadCommand { .. }
        )
    }
}

/// Result type using KvError.
pub type KvResult<T> = Result<T, KvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_covers_transient_conditions() {
        assert!(KvError::NoLeader.is_retriable());
        assert!(KvError::CommitTimeout.is_retriable());
        assert!(!KvError::NoSuchKey.is_retriable());
        assert!(!KvError::KeyTooLarge {
            actual: 2048,
            limit: 1024
        }
        .is_retriable());
    }

    #[test]
    fn corruption_is_not_retriable() {
        let err = KvError::CorruptWal {
            last_good_id: 41,
            reason: "truncated enum tag".into(),
        };
        assert!(err.is_corruption());
        assert!(!err.is_retriable());
    }

    #[test]
    fn display_carries_limits() {
        let err = KvError::ValueTooLarge {
            actual: 64,
            limit: 20,
        };
        assert_eq!(
            err.to_string(),
            "value too large: 64 bytes exceeds limit of 20"
        );
    }
}
