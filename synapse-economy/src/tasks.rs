//! Task lifecycle operations. Every mutation here runs inside
//! `StateStore::with_state`, so they take the live `GlobalChannel` /
//! `TopicalChannel` pair rather than a cloned snapshot — balance
//! sufficiency has to be checked in the same critical section as the
//! insert, or two concurrent creators could both pass the check against
//! the same stale balance.

use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use synapse_core::config::EconomyConfig;
use synapse_core::state::{GlobalChannel, TopicalChannel};
use synapse_core::types::{ChannelId, FundingSource, NodeId, Task, TaskStatus};
use synapse_core::{SynapseError, SynapseResult};

use crate::balance::{compute_balances, compute_treasuries};

/// Payload accepted by [`create`]; schema validation happens one layer up,
/// against the channel's declared schema, before this is ever called.
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub reward: f64,
    pub tags: Vec<String>,
    pub schema_name: String,
    pub required_tools: Vec<String>,
    pub funded_by: FundingSource,
    pub auction_deadline: Option<chrono::DateTime<Utc>>,
}

/// Creates a task, debiting the funding source immediately. Returns
/// `InsufficientFunds` without mutating state if the funder can't cover the
/// reward.
pub fn create(
    global: &GlobalChannel,
    channels: &mut HashMap<ChannelId, TopicalChannel>,
    channel_id: &ChannelId,
    creator: &NodeId,
    new_task: NewTask,
    config: &EconomyConfig,
) -> SynapseResult<Uuid> {
    if new_task.reward < 0.0 {
        return Err(SynapseError::Validation("reward must be non-negative".into()));
    }

    match &new_task.funded_by {
        FundingSource::Node(node) => {
            let balances = compute_balances(global, channels, config);
            let available = balances.get(node).copied().unwrap_or(config.initial_balance_sp);
            if available < new_task.reward {
                return Err(SynapseError::InsufficientFunds {
                    needed: new_task.reward,
                    available,
                });
            }
        }
        FundingSource::Treasury(funded_channel) => {
            let treasuries = compute_treasuries(channels, config);
            let available = treasuries
                .get(funded_channel)
                .copied()
                .unwrap_or(config.treasury_initial_balance);
            if available < new_task.reward {
                return Err(SynapseError::InsufficientFunds {
                    needed: new_task.reward,
                    available,
                });
            }
        }
    }

    let now = Utc::now();
    let id = Uuid::new_v4();
    let auction = new_task.auction_deadline.map(|deadline| synapse_core::types::Auction {
        enabled: true,
        status: synapse_core::types::AuctionStatus::Open,
        max_reward: new_task.reward,
        deadline,
        bids: HashMap::new(),
        selected_bid: None,
    });
    let status = if auction.is_some() {
        TaskStatus::AuctionOpen
    } else {
        TaskStatus::Open
    };

    let task = Task {
        id,
        creator: new_task.funded_by.to_wire(),
        owner: creator.clone(),
        title: new_task.title,
        status,
        assignee: None,
        reward: new_task.reward,
        tags: new_task.tags,
        description: new_task.description,
        schema_name: new_task.schema_name,
        created_at: now,
        updated_at: now,
        is_deleted: false,
        required_tools: new_task.required_tools,
        auction,
    };

    channels.entry(channel_id.clone()).or_default().tasks.insert(id, task);
    Ok(id)
}

pub fn claim(
    channel: &mut TopicalChannel,
    task_id: Uuid,
    caller: &NodeId,
) -> SynapseResult<()> {
    let task = channel
        .tasks
        .get_mut(&task_id)
        .ok_or_else(|| SynapseError::NotFound(format!("task {task_id}")))?;
    if task.status != TaskStatus::Open {
        return Err(SynapseError::InvalidTransition(format!(
            "cannot claim task in status {:?}",
            task.status
        )));
    }
    task.status = TaskStatus::Claimed;
    task.assignee = Some(caller.clone());
    task.updated_at = Utc::now();
    Ok(())
}

pub fn progress(
    channel: &mut TopicalChannel,
    task_id: Uuid,
    caller: &NodeId,
) -> SynapseResult<()> {
    let task = channel
        .tasks
        .get_mut(&task_id)
        .ok_or_else(|| SynapseError::NotFound(format!("task {task_id}")))?;
    if task.assignee.as_ref() != Some(caller) {
        return Err(SynapseError::Auth);
    }
    if task.status != TaskStatus::Claimed {
        return Err(SynapseError::InvalidTransition(format!(
            "cannot progress task in status {:?}",
            task.status
        )));
    }
    task.status = TaskStatus::InProgress;
    task.updated_at = Utc::now();
    Ok(())
}

/// Marks the task complete. Reward/tax/reputation flow is realized entirely
/// by the pure calculators replaying this new `Completed` status; nothing
/// here touches a balance directly.
pub fn complete(
    channel: &mut TopicalChannel,
    task_id: Uuid,
    caller: &NodeId,
) -> SynapseResult<()> {
    let task = channel
        .tasks
        .get_mut(&task_id)
        .ok_or_else(|| SynapseError::NotFound(format!("task {task_id}")))?;
    if task.assignee.as_ref() != Some(caller) {
        return Err(SynapseError::Auth);
    }
    if task.status != TaskStatus::InProgress {
        return Err(SynapseError::InvalidTransition(format!(
            "cannot complete task in status {:?}",
            task.status
        )));
    }
    task.status = TaskStatus::Completed;
    task.updated_at = Utc::now();
    Ok(())
}

/// Soft-deletes a task. The record stays in state (and keeps merging LWW)
/// with `is_deleted = true` rather than being removed, so peers that
/// haven't seen the deletion yet can't resurrect it by re-gossiping an
/// older copy.
pub fn delete(
    channel: &mut TopicalChannel,
    task_id: Uuid,
    caller: &NodeId,
) -> SynapseResult<()> {
    let task = channel
        .tasks
        .get_mut(&task_id)
        .ok_or_else(|| SynapseError::NotFound(format!("task {task_id}")))?;
    if &task.owner != caller {
        return Err(SynapseError::Auth);
    }
    task.is_deleted = true;
    task.updated_at = Utc::now();
    Ok(())
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

    #[test]
    fn create_rejects_when_creator_cannot_afford_reward() {
        let global = GlobalChannel::default();
        let mut channels = HashMap::new();
        let creator = NodeId("alice".to_string());
        let new_task = NewTask {
            title: "t".into(),
            description: "".into(),
            reward: 1000.0,
            tags: vec![],
            schema_name: "task_v1".into(),
            required_tools: vec![],
            funded_by: FundingSource::Node(creator.clone()),
            auction_deadline: None,
        };
        let result = create(
            &global,
            &mut channels,
            &ChannelId::from("eng"),
            &creator,
            new_task,
            &config(),
        );
        assert!(matches!(result, Err(SynapseError::InsufficientFunds { .. })));
    }

    #[test]
    fn full_lifecycle_transitions_in_order() {
        let global = GlobalChannel::default();
        let mut channels = HashMap::new();
        let creator = NodeId("alice".to_string());
        let assignee = NodeId("bob".to_string());
        let channel_id = ChannelId::from("eng");
        let new_task = NewTask {
            title: "t".into(),
            description: "".into(),
            reward: 10.0,
            tags: vec![],
            schema_name: "task_v1".into(),
            required_tools: vec![],
            funded_by: FundingSource::Node(creator.clone()),
            auction_deadline: None,
        };
        let id = create(&global, &mut channels, &channel_id, &creator, new_task, &config()).unwrap();
        let channel = channels.get_mut(&channel_id).unwrap();

        claim(channel, id, &assignee).unwrap();
        assert_eq!(channel.tasks[&id].status, TaskStatus::Claimed);

        progress(channel, id, &assignee).unwrap();
        assert_eq!(channel.tasks[&id].status, TaskStatus::InProgress);

        complete(channel, id, &assignee).unwrap();
        assert_eq!(channel.tasks[&id].status, TaskStatus::Completed);
    }

    #[test]
    fn claim_rejects_wrong_state() {
        let global = GlobalChannel::default();
        let mut channels = HashMap::new();
        let creator = NodeId("alice".to_string());
        let channel_id = ChannelId::from("eng");
        let new_task = NewTask {
            title: "t".into(),
            description: "".into(),
            reward: 10.0,
            tags: vec![],
            schema_name: "task_v1".into(),
            required_tools: vec![],
            funded_by: FundingSource::Node(creator.clone()),
            auction_deadline: None,
        };
        let id = create(&global, &mut channels, &channel_id, &creator, new_task, &config()).unwrap();
        let channel = channels.get_mut(&channel_id).unwrap();
        claim(channel, id, &NodeId("bob".into())).unwrap();
        let result = claim(channel, id, &NodeId("carol".into()));
        assert!(matches!(result, Err(SynapseError::InvalidTransition(_))));
    }
}
