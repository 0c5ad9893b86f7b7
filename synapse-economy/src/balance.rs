//! Balances and treasuries are pure derived values too: nothing in state
//! stores a running balance. Every task creation and completion in the
//! snapshot is replayed to arrive at the current numbers.

use std::collections::HashMap;

use synapse_core::config::EconomyConfig;
use synapse_core::state::{GlobalChannel, TopicalChannel};
use synapse_core::types::{ChannelId, FundingSource, NodeId, TaskStatus};

pub fn tax_for(reward: f64, tax_rate: f64) -> f64 {
    (reward * tax_rate).round().max(1.0)
}

/// Personal SP balances for every node that has participated in at least
/// one task, starting from `initial_balance_sp`. Works against either a
/// point-in-time snapshot or the live state tree held under lock, mirroring
/// `reputation::compute_reputation`'s dual-use signature: task creation needs
/// to check a prospective creator's balance atomically, before the insert,
/// which means calling this against `StateRoot` fields directly from inside
/// `StateStore::with_state`.
pub fn compute_balances(
    global: &GlobalChannel,
    channels: &HashMap<ChannelId, TopicalChannel>,
    config: &EconomyConfig,
) -> HashMap<NodeId, f64> {
    let mut balances: HashMap<NodeId, f64> = HashMap::new();

    let touch = |balances: &mut HashMap<NodeId, f64>, node: &NodeId| {
        balances
            .entry(node.clone())
            .or_insert(config.initial_balance_sp);
    };

    for node_id in global.nodes.keys() {
        touch(&mut balances, node_id);
    }

    for channel in channels.values() {
        for task in channel.tasks.values() {
            if task.reward <= 0.0 {
                continue;
            }
            if let FundingSource::Node(creator) = task.funding_source() {
                touch(&mut balances, &creator);
                *balances.get_mut(&creator).unwrap() -= task.reward;
            }
            if task.status == TaskStatus::Completed {
                if let Some(assignee) = &task.assignee {
                    touch(&mut balances, assignee);
                    let tax = tax_for(task.reward, config.transaction_tax_percentage);
                    *balances.get_mut(assignee).unwrap() += task.reward - tax;
                }
            }
        }
    }

    balances
}

/// Per-channel treasury balances, starting from `treasury_initial_balance`.
pub fn compute_treasuries(
    channels: &HashMap<ChannelId, TopicalChannel>,
    config: &EconomyConfig,
) -> HashMap<ChannelId, f64> {
    let mut treasuries: HashMap<ChannelId, f64> = HashMap::new();

    for (channel_id, channel) in channels {
        let balance = treasuries
            .entry(channel_id.clone())
            .or_insert(config.treasury_initial_balance);

        for task in channel.tasks.values() {
            if task.reward <= 0.0 {
                continue;
            }
            let tax = tax_for(task.reward, config.transaction_tax_percentage);
            if let FundingSource::Treasury(funded_channel) = task.funding_source() {
                if &funded_channel == channel_id {
                    *balance -= task.reward;
                }
            }
            if task.status == TaskStatus::Completed {
                *balance += tax;
            }
        }

        for tool in channel.common_tools.values() {
            if tool.status == synapse_core::types::CommonToolStatus::Active {
                *balance -= tool.monthly_cost_sp;
            }
        }
    }

    treasuries
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_core::state::TopicalChannel;
    use synapse_core::types::Task;

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
    fn completed_user_task_conserves_value_net_of_tax() {
        let creator = NodeId("alice".to_string());
        let assignee = NodeId("bob".to_string());
        let mut channel = TopicalChannel::default();
        let task = Task {
            id: uuid::Uuid::new_v4(),
            creator: creator.0.clone(),
            owner: creator.clone(),
            title: "t".to_string(),
            status: TaskStatus::Completed,
            assignee: Some(assignee.clone()),
            reward: 20.0,
            tags: vec![],
            description: "".to_string(),
            schema_name: "task_v1".to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            is_deleted: false,
            required_tools: vec![],
            auction: None,
        };
        channel.tasks.insert(task.id, task);

        let global = Default::default();
        let mut channels = HashMap::new();
        channels.insert(synapse_core::types::ChannelId::from("eng"), channel);

        let config = config();
        let balances = compute_balances(&global, &channels, &config);
        let tax = tax_for(20.0, config.transaction_tax_percentage);

        assert_eq!(balances[&creator], 100.0 - 20.0);
        assert_eq!(balances[&assignee], 100.0 + 20.0 - tax);
    }

    #[test]
    fn treasury_never_implied_negative_by_helper() {
        assert_eq!(tax_for(0.5, 0.1), 1.0);
    }
}
