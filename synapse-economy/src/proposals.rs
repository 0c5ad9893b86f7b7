//! Proposal lifecycle: creation, public and anonymous voting, and the
//! outcome computation that drives closure. Dispatching a closed
//! proposal's side effect (applying a config change directly vs. handing a
//! `command`/`network_operation`/`code_upgrade` proposal to the command
//! executor or the ratification path) is left to the caller — this crate
//! sits below `synapse-consensus` in the dependency order and cannot call
//! into it directly.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use synapse_core::config::EconomyConfig;
use synapse_core::state::TopicalChannel;
use synapse_core::types::{
    AnonymousVoteRecord, NodeId, Proposal, ProposalStatus, ProposalType, Reputation, VoteChoice,
};
use synapse_core::{SynapseError, SynapseResult};

use crate::reputation::vote_weight;

/// Reputation-tier weights used when tallying anonymous votes, mirroring
/// the tiers the ZKP proof layer stamps onto each vote at proof time.
pub fn tier_weight(tier: &str) -> f64 {
    match tier {
        "novice" => 1.0,
        "intermediate" => 1.5,
        "expert" => 2.0,
        _ => 0.0,
    }
}

pub struct NewProposal {
    pub title: String,
    pub description: String,
    pub proposal_type: ProposalType,
    pub params: serde_json::Value,
    pub command: Option<String>,
    pub tags: Vec<String>,
    pub schema_name: String,
}

pub fn create(channel: &mut TopicalChannel, proposer: &NodeId, new_proposal: NewProposal) -> Uuid {
    let now = Utc::now();
    let id = Uuid::new_v4();
    let proposal = Proposal {
        id,
        title: new_proposal.title,
        description: new_proposal.description,
        proposal_type: new_proposal.proposal_type,
        params: new_proposal.params,
        command: new_proposal.command,
        tags: new_proposal.tags,
        schema_name: new_proposal.schema_name,
        proposer: proposer.clone(),
        status: ProposalStatus::Open,
        votes: HashMap::new(),
        anonymous_votes: Vec::new(),
        created_at: now,
        updated_at: now,
        closed_at: None,
        outcome: None,
        execution_result: None,
    };
    channel.proposals.insert(id, proposal);
    id
}

/// Casts or overwrites a caller's public vote. A voter can change their
/// mind until the proposal closes; the vote map is keyed by voter, so a
/// resubmission simply replaces the earlier choice.
pub fn cast_public_vote(
    channel: &mut TopicalChannel,
    proposal_id: Uuid,
    caller: &NodeId,
    choice: VoteChoice,
) -> SynapseResult<()> {
    let proposal = open_proposal_mut(channel, proposal_id)?;
    proposal.votes.insert(caller.clone(), choice);
    proposal.updated_at = Utc::now();
    Ok(())
}

/// Records a vote already verified by the ZKP proof layer. This function
/// trusts its caller completely: nullifier uniqueness and proof validity
/// must already have been checked before this is reached.
pub fn record_anonymous_vote(
    channel: &mut TopicalChannel,
    proposal_id: Uuid,
    record: AnonymousVoteRecord,
) -> SynapseResult<()> {
    let proposal = open_proposal_mut(channel, proposal_id)?;
    proposal.anonymous_votes.push(record);
    proposal.updated_at = Utc::now();
    Ok(())
}

fn open_proposal_mut(channel: &mut TopicalChannel, proposal_id: Uuid) -> SynapseResult<&mut Proposal> {
    let proposal = channel
        .proposals
        .get_mut(&proposal_id)
        .ok_or_else(|| SynapseError::NotFound(format!("proposal {proposal_id}")))?;
    if proposal.status != ProposalStatus::Open {
        return Err(SynapseError::InvalidTransition(
            "proposal is not open for voting".into(),
        ));
    }
    Ok(proposal)
}

/// What the caller should do next after a proposal closes. Closing itself
/// always runs; the variant tells the orchestrator which downstream crate
/// needs to take over (`synapse-consensus` for ratification and command
/// dispatch, or nothing further for a no-op generic proposal).
#[derive(Debug, Clone, PartialEq)]
pub enum CloseAction {
    /// Approved `generic` proposal; no side effect to perform.
    None,
    /// Approved `config_change`; caller applies the described key/value
    /// directly against `RuntimeConfig` and bumps `config_version`.
    ApplyConfigChange,
    /// Approved `command` proposal; caller executes the embedded command
    /// synchronously through the command dispatcher, local-effect only.
    ExecuteCommandNow,
    /// Approved `network_operation` / `code_upgrade`; caller enqueues into
    /// `pending_operations` for validator ratification.
    EnqueueForRatification,
    /// The proposal did not pass.
    Rejected,
}

/// Tallies weighted votes, sets the proposal's outcome and status, and
/// reports what the caller should do next.
pub fn close(
    channel: &mut TopicalChannel,
    proposal_id: Uuid,
    reputations: &HashMap<NodeId, Reputation>,
    config: &EconomyConfig,
) -> SynapseResult<CloseAction> {
    let proposal = channel
        .proposals
        .get_mut(&proposal_id)
        .ok_or_else(|| SynapseError::NotFound(format!("proposal {proposal_id}")))?;
    if proposal.status != ProposalStatus::Open {
        return Err(SynapseError::InvalidTransition(
            "proposal is already closed".into(),
        ));
    }

    let mut yes_weight = 0.0;
    let mut no_weight = 0.0;

    for (voter, choice) in &proposal.votes {
        let reputation = reputations.get(voter).cloned().unwrap_or_default();
        let weight = vote_weight(&reputation, &proposal.tags, config.vote_weight_log_base);
        match choice {
            VoteChoice::Yes => yes_weight += weight,
            VoteChoice::No => no_weight += weight,
        }
    }

    for anon in &proposal.anonymous_votes {
        let weight = tier_weight(&anon.tier);
        match anon.vote {
            VoteChoice::Yes => yes_weight += weight,
            VoteChoice::No => no_weight += weight,
        }
    }

    let approved = yes_weight > no_weight;
    let now = Utc::now();
    proposal.closed_at = Some(now);
    proposal.updated_at = now;
    proposal.outcome = Some(if approved { "approved".to_string() } else { "rejected".to_string() });

    if !approved {
        proposal.status = ProposalStatus::Rejected;
        return Ok(CloseAction::Rejected);
    }

    let action = match proposal.proposal_type {
        ProposalType::Generic => {
            proposal.status = ProposalStatus::Closed;
            CloseAction::None
        }
        ProposalType::ConfigChange => {
            proposal.status = ProposalStatus::Approved;
            CloseAction::ApplyConfigChange
        }
        ProposalType::Command => {
            proposal.status = ProposalStatus::Approved;
            CloseAction::ExecuteCommandNow
        }
        ProposalType::NetworkOperation | ProposalType::CodeUpgrade => {
            proposal.status = ProposalStatus::PendingRatification;
            CloseAction::EnqueueForRatification
        }
    };

    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EconomyConfig {
        EconomyConfig {
            initial_balance_sp: 100.0,
            treasury_initial_balance: 50.0,
            transaction_tax_percentage: 0.1,
            task_completion_reputation_reward: 10.0,
            proposal_vote_reputation_reward: 1.0,
            vote_weight_log_base: 2.0,
        }
    }

    fn new_generic(title: &str) -> NewProposal {
        NewProposal {
            title: title.to_string(),
            description: "".to_string(),
            proposal_type: ProposalType::Generic,
            params: serde_json::json!({}),
            command: None,
            tags: vec![],
            schema_name: "proposal_v1".to_string(),
        }
    }

    #[test]
    fn majority_yes_approves_generic_proposal() {
        let mut channel = TopicalChannel::default();
        let proposer = NodeId("alice".into());
        let id = create(&mut channel, &proposer, new_generic("p"));
        cast_public_vote(&mut channel, id, &NodeId("a".into()), VoteChoice::Yes).unwrap();
        cast_public_vote(&mut channel, id, &NodeId("b".into()), VoteChoice::Yes).unwrap();
        cast_public_vote(&mut channel, id, &NodeId("c".into()), VoteChoice::No).unwrap();

        let action = close(&mut channel, id, &HashMap::new(), &config()).unwrap();
        assert_eq!(action, CloseAction::None);
        assert_eq!(channel.proposals[&id].status, ProposalStatus::Closed);
        assert_eq!(channel.proposals[&id].outcome.as_deref(), Some("approved"));
    }

    #[test]
    fn network_operation_routes_to_ratification() {
        let mut channel = TopicalChannel::default();
        let proposer = NodeId("alice".into());
        let mut new_proposal = new_generic("upgrade");
        new_proposal.proposal_type = ProposalType::NetworkOperation;
        let id = create(&mut channel, &proposer, new_proposal);
        cast_public_vote(&mut channel, id, &NodeId("a".into()), VoteChoice::Yes).unwrap();

        let action = close(&mut channel, id, &HashMap::new(), &config()).unwrap();
        assert_eq!(action, CloseAction::EnqueueForRatification);
        assert_eq!(channel.proposals[&id].status, ProposalStatus::PendingRatification);
    }

    #[test]
    fn cannot_vote_on_closed_proposal() {
        let mut channel = TopicalChannel::default();
        let proposer = NodeId("alice".into());
        let id = create(&mut channel, &proposer, new_generic("p"));
        close(&mut channel, id, &HashMap::new(), &config()).unwrap();
        let result = cast_public_vote(&mut channel, id, &NodeId("a".into()), VoteChoice::Yes);
        assert!(matches!(result, Err(SynapseError::InvalidTransition(_))));
    }
}
