//! Validator election, Raft-style leader election among validators, the
//! vote-union ratification path, and the deterministic command executor
//! that replays ratified operations.

pub mod election;
pub mod engine;
pub mod executor;
pub mod raft;
pub mod ratification;
pub mod types;

pub use engine::ConsensusEngine;
pub use raft::RaftState;
