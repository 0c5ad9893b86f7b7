//! The per-node consensus orchestrator: owns this node's `RaftState` when
//! it is a validator, and exposes the entry points the background loops
//! (validator election, ratification sweep, command execution) call on
//! every tick.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use synapse_core::config::EconomyConfig;
use synapse_core::state::StateStore;
use synapse_core::types::{CommandOperation, NodeId};
use synapse_core::SynapseResult;

use crate::election;
use crate::raft::RaftState;
use crate::ratification;

/// Owns this node's Raft state and wires the pure election/ratification/
/// executor functions against the shared [`StateStore`].
pub struct ConsensusEngine {
    self_id: NodeId,
    state: StateStore,
    raft: Arc<RwLock<RaftState>>,
}

impl ConsensusEngine {
    pub fn new(self_id: NodeId, state: StateStore) -> Self {
        let raft = RaftState::new(self_id.clone());
        Self {
            self_id,
            state,
            raft: Arc::new(RwLock::new(raft)),
        }
    }

    pub fn raft_handle(&self) -> Arc<RwLock<RaftState>> {
        self.raft.clone()
    }

    /// Recomputes the validator set from current reputation and swaps it
    /// in if it changed. Called on `validator_election_interval_seconds`.
    pub fn run_validator_election(&self, config: &EconomyConfig) -> bool {
        self.state.with_state(|root| {
            let reputations = synapse_economy::compute_reputation(&root.global, &root.channels, config, chrono::Utc::now());
            let elected = election::elect_validators(&reputations, root_validator_set_size(root));
            if election::has_changed(&root.global.validator_set, &elected) {
                root.global.validator_set = elected;
                root.global.validator_set_updated_at = chrono::Utc::now();
                info!(count = root.global.validator_set.len(), "validator set updated");
                true
            } else {
                false
            }
        })
    }

    /// Casts this node's ratification vote for a pending operation, then
    /// checks whether the new vote pushed it over the majority threshold.
    pub fn ratify(&self, proposal_id: Uuid, operation: CommandOperation) -> SynapseResult<bool> {
        let self_id = self.self_id.clone();
        self.state.with_state(|root| {
            ratification::submit_vote(&mut root.global, proposal_id, self_id)?;
            ratification::try_ratify(&mut root.global, proposal_id, operation)
        })
    }

    /// Replays every unapplied ratified command. Called on the command
    /// executor's interval.
    pub fn run_command_executor(&self, config: &EconomyConfig) {
        self.state.with_state(|root| {
            crate::executor::run_pending(&mut root.global, &mut root.channels, config);
        });
    }

    /// Enqueues a closed `network_operation`/`code_upgrade` proposal for
    /// validator ratification, casting this node's own vote immediately if
    /// it happens to be a validator.
    pub fn enqueue_for_ratification(&self, proposal_id: Uuid, operation: CommandOperation) -> SynapseResult<bool> {
        self.state.with_state(|root| {
            ratification::enqueue(&mut root.global, proposal_id);
        });
        self.ratify(proposal_id, operation)
    }

    /// Appends an already-approved `command` proposal straight to the
    /// execution log: a `command` proposal passes by ordinary weighted vote,
    /// so unlike `network_operation`/`code_upgrade` it skips the validator
    /// ratification union entirely.
    pub fn execute_command_now(&self, proposal_id: Uuid, operation: CommandOperation) {
        self.state.with_state(|root| {
            let params = root
                .global
                .proposals
                .get(&proposal_id)
                .map(|p| p.params.clone())
                .unwrap_or(serde_json::Value::Null);
            root.global.execution_log.push(synapse_core::types::Command {
                command_id: Uuid::new_v4(),
                proposal_id,
                operation,
                params,
                ratified_at: chrono::Utc::now(),
                ratified_by: vec![self.self_id.clone()],
            });
        });
    }
}

fn root_validator_set_size(root: &synapse_core::state::StateRoot) -> usize {
    root.global.config.0.governance.validator_set_size
}
