//! Tessera - replicated, strongly-consistent key-value store.
//!
//! Tessera serves PUT/GET/DELETE over string keys and values with
//! linearizable semantics regardless of which node is contacted;
//! non-leader traffic is redirected to the current leader. Consensus
//! itself is an external collaborator behind the [`replica::raft`]
//! contract. In standalone deployments the local write-ahead log is
//! the durability substrate; in replicated deployments the consensus
//! log is, and the local engine holds only applied state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     HTTP API (/v1/{key})                        │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Request Coordinator                         │
//! │        (validation, submit, commit futures, redirects)          │
//! └─────────────────────────────────────────────────────────────────┘
//!            │ standalone                       │ replicated
//! ┌──────────────────────────┐    ┌─────────────────────────────────┐
//! │   WAL + Snapshotter      │    │  Consensus (external) + FSM     │
//! │  append, fsync, compact  │    │  apply loop, futures store      │
//! └──────────────────────────┘    └─────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Sharded KV Engine                            │
//! │         per-shard locks │ rebuild supervisor │ limits           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Component lifecycle orchestration
//! - [`core::error`] - Error types and classification
//!
//! ## Engine
//! - [`engine`] - KV engine policy layer
//! - [`engine::shard`] - Sharded concurrent map
//! - [`engine::supervisor`] - Shard rebuild supervisor
//! - [`engine::hasher`] - Shard-routing hash
//!
//! ## Storage
//! - [`storage::wal`] - Write-ahead log and compaction
//! - [`storage::snapshot`] - Snapshot files and retention
//! - [`storage::codec`] - Length-prefixed record framing
//!
//! ## Replica
//! - [`replica::command`] - Replicated command schema
//! - [`replica::raft`] - Consumed consensus contract
//! - [`replica::futures`] - Commit futures store
//! - [`replica::fsm`] - FSM adapter and apply loop
//!
//! ## API
//! - [`api`] - HTTP surface and request coordinator
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - **LOG-ORDER**: the engine reflects commands in log order; WAL
//!   record ids are strictly monotonic
//! - **SHARD-LOCAL**: a shard mutates only under its own lock; rebuilds
//!   preserve contents exactly
//! - **ONE-FUTURE**: all registrations for a log index share one commit
//!   future, whichever of register and fulfill arrives first
//! - **DURABLE-FIRST**: only records durable before a WAL rotation
//!   appear in the compaction snapshot

// Core infrastructure
pub mod core;

// Sharded KV engine
pub mod engine;

// Durable storage
pub mod storage;

// Replicated state machine layer
pub mod replica;

// Client-facing API
pub mod api;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime};
pub use api::coordinator;
pub use engine::KvEngine;
pub use replica::{command, fsm, futures, raft};
pub use storage::{codec, snapshot, wal};
