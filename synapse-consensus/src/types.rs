//! Raft-local types: the validator-facing RPCs and the per-validator
//! election state. Distinct from `synapse_core::types::Command`, which is
//! the replicated, gossip-merged record that results once a round
//! actually ratifies.

use serde::{Deserialize, Serialize};
use synapse_core::types::NodeId;

pub type Term = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// One entry in a validator's local Raft log. Carries no payload of its
/// own: ratification outcomes flow through the separate, vote-union based
/// path in [`crate::ratification`], so this log exists purely to give
/// leader election a well-defined "who has the more complete history"
/// comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub candidate_id: NodeId,
    pub term: Term,
    pub last_log_index: u64,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub leader_id: NodeId,
    pub term: Term,
    pub prev_log_index: u64,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: Term,
    pub success: bool,
}
