//! The ratification path for community-approved `network_operation` and
//! `code_upgrade` proposals: validators union their votes until a majority
//! is reached, at which point the operation becomes a `Command` appended
//! to the append-only `execution_log`.

use chrono::Utc;
use uuid::Uuid;

use synapse_core::state::GlobalChannel;
use synapse_core::types::{Command, CommandOperation, NodeId, ProposalStatus};
use synapse_core::{SynapseError, SynapseResult};

use crate::raft::majority;

/// Moves a just-closed proposal into the ratification queue. Called right
/// after `synapse_economy::proposals::close` returns
/// `CloseAction::EnqueueForRatification`.
pub fn enqueue(global: &mut GlobalChannel, proposal_id: Uuid) {
    global.pending_operations.insert(proposal_id);
    global.ratification_votes.entry(proposal_id).or_default();
}

/// A single validator's ratification vote for a pending operation. The
/// vote set is a plain union: two validators voting twice just dedupes.
pub fn submit_vote(global: &mut GlobalChannel, proposal_id: Uuid, validator: NodeId) -> SynapseResult<()> {
    if !global.validator_set.contains(&validator) {
        return Err(SynapseError::Auth);
    }
    if !global.pending_operations.contains(&proposal_id) {
        return Err(SynapseError::NotFound(format!("pending operation {proposal_id}")));
    }
    global
        .ratification_votes
        .entry(proposal_id)
        .or_default()
        .insert(validator);
    Ok(())
}

/// Checks whether `proposal_id` has reached a ratifying majority of the
/// current validator set; if so, builds the `Command`, appends it to
/// `execution_log`, and clears the pending-operation bookkeeping.
pub fn try_ratify(global: &mut GlobalChannel, proposal_id: Uuid, operation: CommandOperation) -> SynapseResult<bool> {
    let votes = global.ratification_votes.get(&proposal_id).cloned().unwrap_or_default();
    let required = majority(global.validator_set.len());

    if votes.len() < required {
        return Ok(false);
    }

    let params = global
        .proposals
        .get(&proposal_id)
        .map(|p| p.params.clone())
        .unwrap_or(serde_json::Value::Null);

    let command = Command {
        command_id: Uuid::new_v4(),
        proposal_id,
        operation,
        params,
        ratified_at: Utc::now(),
        ratified_by: votes.into_iter().collect(),
    };
    global.execution_log.push(command);
    global.pending_operations.remove(&proposal_id);
    global.ratification_votes.remove(&proposal_id);

    if let Some(proposal) = global.proposals.get_mut(&proposal_id) {
        proposal.status = ProposalStatus::Ratified;
        proposal.updated_at = Utc::now();
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratifies_once_majority_reached() {
        let mut global = GlobalChannel::default();
        global.validator_set = vec![NodeId("a".into()), NodeId("b".into()), NodeId("c".into())];
        let proposal_id = Uuid::new_v4();
        enqueue(&mut global, proposal_id);

        submit_vote(&mut global, proposal_id, NodeId("a".into())).unwrap();
        assert!(!try_ratify(&mut global, proposal_id, CommandOperation::UpdateSchema).unwrap());

        submit_vote(&mut global, proposal_id, NodeId("b".into())).unwrap();
        assert!(try_ratify(&mut global, proposal_id, CommandOperation::UpdateSchema).unwrap());
        assert_eq!(global.execution_log.len(), 1);
        assert!(!global.pending_operations.contains(&proposal_id));
    }

    #[test]
    fn non_validator_vote_rejected() {
        let mut global = GlobalChannel::default();
        global.validator_set = vec![NodeId("a".into())];
        let proposal_id = Uuid::new_v4();
        enqueue(&mut global, proposal_id);
        let result = submit_vote(&mut global, proposal_id, NodeId("outsider".into()));
        assert!(matches!(result, Err(SynapseError::Auth)));
    }
}
