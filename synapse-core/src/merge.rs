//! The CRDT merge engine: given an inbound channel snapshot and the local
//! one, produce a merged result that is commutative, associative, and
//! idempotent regardless of delivery order. Every entity is schema-validated
//! before it is allowed to enter state; invalid entities are dropped.

use tracing::warn;

use crate::state::{GlobalChannel, TopicalChannel};
use crate::types::{NodeId, Task};

/// Merge `incoming` into `local` in place, applying the CRDT rule
/// appropriate to each field.
pub fn merge_global(local: &mut GlobalChannel, incoming: &GlobalChannel) {
    for (id, incoming_record) in &incoming.nodes {
        match local.nodes.get(id) {
            Some(existing) if existing.last_seen >= incoming_record.last_seen => {}
            _ => {
                local.nodes.insert(id.clone(), incoming_record.clone());
            }
        }
    }

    if incoming.config.0.config_version > local.config.0.config_version {
        local.config = incoming.config.clone();
    }

    if incoming.validator_set_updated_at > local.validator_set_updated_at {
        local.validator_set = incoming.validator_set.clone();
        local.validator_set_updated_at = incoming.validator_set_updated_at;
    }

    for (name, incoming_schema) in &incoming.schemas {
        match local.schemas.get(name) {
            Some(existing) if existing.updated_at >= incoming_schema.updated_at => {}
            _ => {
                local.schemas.insert(name.clone(), incoming_schema.clone());
            }
        }
    }

    let mut merged_log = local.execution_log.clone();
    let known_ids: std::collections::HashSet<_> =
        merged_log.iter().map(|c| c.command_id).collect();
    for command in &incoming.execution_log {
        if !known_ids.contains(&command.command_id) {
            merged_log.push(command.clone());
        }
    }
    merged_log.sort_by(|a, b| {
        a.ratified_at
            .cmp(&b.ratified_at)
            .then_with(|| a.command_id.cmp(&b.command_id))
    });
    local.execution_log = merged_log;

    for (proposal_id, voters) in &incoming.ratification_votes {
        local
            .ratification_votes
            .entry(*proposal_id)
            .or_default()
            .extend(voters.iter().cloned());
    }

    local
        .pending_operations
        .extend(incoming.pending_operations.iter().copied());

    for (proposal_id, incoming_proposal) in &incoming.proposals {
        merge_proposal_into(local, *proposal_id, incoming_proposal);
    }

    for (proposal_id, nullifiers) in &incoming.zkp_nullifiers {
        local
            .zkp_nullifiers
            .entry(*proposal_id)
            .or_default()
            .extend(nullifiers.iter().cloned());
    }
}

fn merge_proposal_into(
    local: &mut GlobalChannel,
    proposal_id: uuid::Uuid,
    incoming: &crate::types::Proposal,
) {
    match local.proposals.get_mut(&proposal_id) {
        None => {
            local.proposals.insert(proposal_id, incoming.clone());
        }
        Some(existing) => merge_proposal_fields(existing, incoming),
    }
}

fn merge_proposal_fields(local: &mut crate::types::Proposal, incoming: &crate::types::Proposal) {
    if incoming.updated_at > local.updated_at {
        let votes = std::mem::take(&mut local.votes);
        let anon = std::mem::take(&mut local.anonymous_votes);
        *local = incoming.clone();
        merge_votes(&mut local.votes, &votes);
        merge_anonymous(&mut local.anonymous_votes, &anon);
    } else {
        merge_votes(&mut local.votes, &incoming.votes);
        merge_anonymous(&mut local.anonymous_votes, &incoming.anonymous_votes);
    }
}

fn merge_votes(
    local: &mut std::collections::HashMap<NodeId, crate::types::VoteChoice>,
    incoming: &std::collections::HashMap<NodeId, crate::types::VoteChoice>,
) {
    for (voter, choice) in incoming {
        local.entry(voter.clone()).or_insert(*choice);
    }
}

fn merge_anonymous(
    local: &mut Vec<crate::types::AnonymousVoteRecord>,
    incoming: &[crate::types::AnonymousVoteRecord],
) {
    let known: std::collections::HashSet<_> =
        local.iter().map(|v| v.nullifier.clone()).collect();
    for record in incoming {
        if !known.contains(&record.nullifier) {
            local.push(record.clone());
        }
    }
}

/// Merge a topical channel snapshot. `schemas` is the merged global schema
/// set, used to reject entities that no longer validate.
pub fn merge_topical(
    local: &mut TopicalChannel,
    incoming: &TopicalChannel,
    schemas: &std::collections::HashMap<String, synapse_schema::SchemaDocument>,
) {
    local.participants.extend(incoming.participants.iter().cloned());
    local.archived = local.archived || incoming.archived;

    for (task_id, incoming_task) in &incoming.tasks {
        if !task_validates(incoming_task, schemas) {
            warn!(task_id = %task_id, "dropping task that fails schema validation during merge");
            continue;
        }
        match local.tasks.get(task_id) {
            Some(existing) if existing.updated_at >= incoming_task.updated_at => {
                // Still fold in any bids/auction state the existing record might be missing.
                if let (Some(local_auction), Some(incoming_auction)) =
                    (local.tasks.get(task_id).and_then(|t| t.auction.clone()), incoming_task.auction.clone())
                {
                    let mut merged_bids = local_auction.bids.clone();
                    for (bidder, bid) in &incoming_auction.bids {
                        match merged_bids.get(bidder) {
                            Some(existing_bid) if existing_bid.timestamp >= bid.timestamp => {}
                            _ => {
                                merged_bids.insert(bidder.clone(), bid.clone());
                            }
                        }
                    }
                    if let Some(task) = local.tasks.get_mut(task_id) {
                        if let Some(auction) = task.auction.as_mut() {
                            auction.bids = merged_bids;
                        }
                    }
                }
            }
            _ => {
                local.tasks.insert(task_id.clone(), incoming_task.clone());
            }
        }
    }

    for (proposal_id, incoming_proposal) in &incoming.proposals {
        match local.proposals.get_mut(proposal_id) {
            None => {
                local.proposals.insert(*proposal_id, incoming_proposal.clone());
            }
            Some(existing) => merge_proposal_fields(existing, incoming_proposal),
        }
    }

    for (tool_id, tool) in &incoming.common_tools {
        local
            .common_tools
            .entry(tool_id.clone())
            .and_modify(|existing| {
                if tool.last_payment_at > existing.last_payment_at {
                    *existing = tool.clone();
                }
            })
            .or_insert_with(|| tool.clone());
    }
}

fn task_validates(
    task: &Task,
    schemas: &std::collections::HashMap<String, synapse_schema::SchemaDocument>,
) -> bool {
    let Some(schema) = schemas.get(&task.schema_name) else {
        return false;
    };
    let Ok(value) = serde_json::to_value(task) else {
        return false;
    };
    synapse_schema::validate(&value, schema).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeRecord, TaskStatus};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn sample_task(id: Uuid, updated_at: chrono::DateTime<Utc>) -> Task {
        Task {
            id,
            creator: "node-a".to_string(),
            owner: NodeId("node-a".to_string()),
            title: "write docs".to_string(),
            status: TaskStatus::Open,
            assignee: None,
            reward: 5.0,
            tags: vec![],
            description: "".to_string(),
            schema_name: "task_v1".to_string(),
            created_at: updated_at,
            updated_at,
            is_deleted: false,
            required_tools: vec![],
            auction: None,
        }
    }

    #[test]
    fn node_merge_is_last_writer_wins_by_last_seen() {
        let mut local = GlobalChannel::default();
        let now = Utc::now();
        local.nodes.insert(
            NodeId("n1".to_string()),
            NodeRecord {
                url: "old".to_string(),
                kx_public_key: "k".to_string(),
                last_seen: now,
                version: 1,
            },
        );
        let mut incoming = GlobalChannel::default();
        incoming.nodes.insert(
            NodeId("n1".to_string()),
            NodeRecord {
                url: "new".to_string(),
                kx_public_key: "k".to_string(),
                last_seen: now + Duration::seconds(1),
                version: 2,
            },
        );
        merge_global(&mut local, &incoming);
        assert_eq!(local.nodes[&NodeId("n1".to_string())].url, "new");
    }

    #[test]
    fn merge_is_idempotent() {
        let mut local = TopicalChannel::default();
        let now = Utc::now();
        let task = sample_task(Uuid::new_v4(), now);
        let mut incoming = TopicalChannel::default();
        incoming.tasks.insert(task.id, task.clone());
        let schemas = synapse_schema::builtin_schemas();

        merge_topical(&mut local, &incoming, &schemas);
        let after_first = local.tasks.clone();
        merge_topical(&mut local, &incoming, &schemas);
        assert_eq!(local.tasks.len(), after_first.len());
        assert_eq!(local.tasks[&task.id].title, "write docs");
    }

    #[test]
    fn invalid_task_is_dropped() {
        let mut local = TopicalChannel::default();
        let mut bad_task = sample_task(Uuid::new_v4(), Utc::now());
        bad_task.reward = -10.0;
        let mut incoming = TopicalChannel::default();
        incoming.tasks.insert(bad_task.id, bad_task.clone());
        let schemas = synapse_schema::builtin_schemas();

        merge_topical(&mut local, &incoming, &schemas);
        assert!(local.tasks.is_empty());
    }

    #[test]
    fn execution_log_merges_and_sorts_by_ratified_at() {
        let mut local = GlobalChannel::default();
        let mut incoming = GlobalChannel::default();
        let now = Utc::now();
        let c1 = crate::types::Command {
            command_id: Uuid::new_v4(),
            proposal_id: Uuid::new_v4(),
            operation: crate::types::CommandOperation::UpdateSchema,
            params: serde_json::json!({}),
            ratified_at: now + Duration::seconds(5),
            ratified_by: vec![],
        };
        let c2 = crate::types::Command {
            command_id: Uuid::new_v4(),
            proposal_id: Uuid::new_v4(),
            operation: crate::types::CommandOperation::UpdateSchema,
            params: serde_json::json!({}),
            ratified_at: now,
            ratified_by: vec![],
        };
        local.execution_log.push(c1.clone());
        incoming.execution_log.push(c2.clone());
        merge_global(&mut local, &incoming);
        assert_eq!(local.execution_log[0].command_id, c2.command_id);
        assert_eq!(local.execution_log[1].command_id, c1.command_id);
    }
}
