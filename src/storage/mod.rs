//! Durable storage: record framing, snapshot files, and the
//! write-ahead log.

pub mod codec;
pub mod snapshot;
pub mod wal;
