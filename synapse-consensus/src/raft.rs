//! Raft-style leader election among the current validator set. Pure state
//! transitions: the timers that drive election timeouts and heartbeats
//! live in the process wiring's background loops, not here, so this module
//! can be exercised without tokio at all.

use std::time::Duration;

use rand::Rng;
use synapse_core::types::NodeId;

use crate::types::{
    AppendEntriesArgs, AppendEntriesReply, LogEntry, RequestVoteArgs, RequestVoteReply, Role, Term,
};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const ELECTION_TIMEOUT_MIN_MS: u64 = 3000;
const ELECTION_TIMEOUT_MAX_MS: u64 = 6000;

pub fn random_election_timeout() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(ELECTION_TIMEOUT_MIN_MS..=ELECTION_TIMEOUT_MAX_MS))
}

/// One validator's view of the leader election state machine.
pub struct RaftState {
    pub self_id: NodeId,
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub log: Vec<LogEntry>,
    pub role: Role,
    pub leader_id: Option<NodeId>,
    pub commit_index: u64,
    pub last_applied: u64,
}

impl RaftState {
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            current_term: 0,
            voted_for: None,
            log: Vec::new(),
            role: Role::Follower,
            leader_id: None,
            commit_index: 0,
            last_applied: 0,
        }
    }

    fn last_log_index(&self) -> u64 {
        self.log.len() as u64
    }

    fn last_log_term(&self) -> Term {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    /// Called when no `AppendEntries` arrives within the election timeout:
    /// becomes a candidate, bumps the term, votes for itself, and returns
    /// the `RequestVote` to broadcast.
    pub fn start_election(&mut self) -> RequestVoteArgs {
        self.current_term += 1;
        self.role = Role::Candidate;
        self.voted_for = Some(self.self_id.clone());
        self.leader_id = None;

        RequestVoteArgs {
            candidate_id: self.self_id.clone(),
            term: self.current_term,
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        }
    }

    /// Handles an incoming `RequestVote`. Grants only if the candidate's
    /// term is at least as high, this node hasn't already voted for
    /// someone else this term, and the candidate's log is at least as
    /// complete as this node's own.
    pub fn handle_request_vote(&mut self, args: &RequestVoteArgs) -> RequestVoteReply {
        if args.term < self.current_term {
            return RequestVoteReply {
                term: self.current_term,
                vote_granted: false,
            };
        }
        if args.term > self.current_term {
            self.current_term = args.term;
            self.role = Role::Follower;
            self.voted_for = None;
        }

        let already_voted_elsewhere = matches!(&self.voted_for, Some(v) if v != &args.candidate_id);
        let candidate_log_ok = (args.last_log_term, args.last_log_index)
            >= (self.last_log_term(), self.last_log_index());

        let grant = !already_voted_elsewhere && candidate_log_ok;
        if grant {
            self.voted_for = Some(args.candidate_id.clone());
        }

        RequestVoteReply {
            term: self.current_term,
            vote_granted: grant,
        }
    }

    /// Becomes leader once a majority of `RequestVoteReply`s in the current
    /// term were granted.
    pub fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.leader_id = Some(self.self_id.clone());
    }

    /// Builds the heartbeat (empty-entries `AppendEntries`) a leader
    /// broadcasts every [`HEARTBEAT_INTERVAL`].
    pub fn heartbeat(&self) -> AppendEntriesArgs {
        AppendEntriesArgs {
            leader_id: self.self_id.clone(),
            term: self.current_term,
            prev_log_index: self.last_log_index(),
            prev_log_term: self.last_log_term(),
            entries: Vec::new(),
            leader_commit: self.commit_index,
        }
    }

    /// Handles an incoming `AppendEntries`. A higher term always demotes
    /// this node to follower; an empty `entries` is just a heartbeat.
    pub fn handle_append_entries(&mut self, args: &AppendEntriesArgs) -> AppendEntriesReply {
        if args.term < self.current_term {
            return AppendEntriesReply {
                term: self.current_term,
                success: false,
            };
        }

        self.current_term = args.term;
        self.role = Role::Follower;
        self.leader_id = Some(args.leader_id.clone());

        if !args.entries.is_empty() {
            self.log.extend(args.entries.iter().copied());
        }
        if args.leader_commit > self.commit_index {
            self.commit_index = args.leader_commit.min(self.last_log_index());
        }

        AppendEntriesReply {
            term: self.current_term,
            success: true,
        }
    }
}

/// A majority of `validator_count` validators, Raft's standard `N/2 + 1`.
pub fn majority(validator_count: usize) -> usize {
    validator_count / 2 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_votes_for_itself_on_election_start() {
        let mut state = RaftState::new(NodeId("a".into()));
        let args = state.start_election();
        assert_eq!(state.role, Role::Candidate);
        assert_eq!(state.voted_for, Some(NodeId("a".into())));
        assert_eq!(args.term, 1);
    }

    #[test]
    fn grants_vote_to_first_candidate_seen_this_term() {
        let mut state = RaftState::new(NodeId("follower".into()));
        let args = RequestVoteArgs {
            candidate_id: NodeId("candidate".into()),
            term: 1,
            last_log_index: 0,
            last_log_term: 0,
        };
        let reply = state.handle_request_vote(&args);
        assert!(reply.vote_granted);
    }

    #[test]
    fn refuses_second_vote_in_same_term() {
        let mut state = RaftState::new(NodeId("follower".into()));
        let first = RequestVoteArgs {
            candidate_id: NodeId("a".into()),
            term: 1,
            last_log_index: 0,
            last_log_term: 0,
        };
        state.handle_request_vote(&first);
        let second = RequestVoteArgs {
            candidate_id: NodeId("b".into()),
            term: 1,
            last_log_index: 0,
            last_log_term: 0,
        };
        let reply = state.handle_request_vote(&second);
        assert!(!reply.vote_granted);
    }

    #[test]
    fn higher_term_append_entries_demotes_candidate_to_follower() {
        let mut state = RaftState::new(NodeId("a".into()));
        state.start_election();
        let heartbeat = AppendEntriesArgs {
            leader_id: NodeId("leader".into()),
            term: 5,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: Vec::new(),
            leader_commit: 0,
        };
        let reply = state.handle_append_entries(&heartbeat);
        assert!(reply.success);
        assert_eq!(state.role, Role::Follower);
        assert_eq!(state.current_term, 5);
    }

    #[test]
    fn majority_of_seven_is_four() {
        assert_eq!(majority(7), 4);
    }
}
