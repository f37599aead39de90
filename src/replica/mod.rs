//! Replicated state machine layer.
//!
//! Command serialization, the consumed consensus contract, the futures
//! store that turns asynchronous log applies into synchronous replies,
//! and the FSM adapter over the KV engine.

pub mod command;
pub mod fsm;
pub mod futures;
pub mod raft;
