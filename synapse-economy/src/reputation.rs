//! Reputation is never stored; it is recomputed fresh from a state snapshot
//! by replaying task completions and proposal votes. This mirrors the
//! teacher's derived-computation style: short critical sections feed a
//! cloned snapshot, and every downstream calculation runs outside the lock.
//!
//! Decay is folded into the replay itself rather than run as a separate
//! mutation: every contribution is weighted by `DECAY_PER_DAY.powf(age_in_days)`
//! at the moment it is replayed, so a node's reputation continuously fades
//! toward zero as its tagged contributions age, with no stored, in-place
//! mutation for a caller to race against. A contribution's decayed value is
//! dropped once it falls below `DECAY_FLOOR`, matching the old stored-decay
//! rule of clearing a tag once it has faded into irrelevance.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use synapse_core::config::EconomyConfig;
use synapse_core::state::{GlobalChannel, TopicalChannel};
use synapse_core::types::{ChannelId, NodeId, Reputation, TaskStatus, VoteChoice};

/// Multiplicative decay applied per elapsed day to every reputation contribution.
const DECAY_PER_DAY: f64 = 0.99;
/// A decayed contribution below this is treated as expired and dropped.
const DECAY_FLOOR: f64 = 0.1;

fn decay_factor(now: DateTime<Utc>, since: DateTime<Utc>) -> f64 {
    let days = (now - since).num_seconds() as f64 / 86_400.0;
    DECAY_PER_DAY.powf(days.max(0.0))
}

/// Replay every completed task and every public vote into a fresh
/// reputation map, weighting each contribution by how much it has decayed
/// by `now`. Anonymous votes never contribute: the whole point of the ZKP
/// protocol is that they are unlinkable to a node id. Works against either
/// a point-in-time snapshot or the live state tree held under lock, since
/// both expose the same `global`/`channels` shape.
pub fn compute_reputation(
    global: &GlobalChannel,
    channels: &HashMap<ChannelId, TopicalChannel>,
    config: &EconomyConfig,
    now: DateTime<Utc>,
) -> HashMap<NodeId, Reputation> {
    let mut reputation: HashMap<NodeId, Reputation> = HashMap::new();

    for channel in channels.values() {
        for task in channel.tasks.values() {
            if task.status != TaskStatus::Completed {
                continue;
            }
            let Some(assignee) = &task.assignee else {
                continue;
            };
            let decayed = config.task_completion_reputation_reward * decay_factor(now, task.updated_at);
            if decayed < DECAY_FLOOR {
                continue;
            }
            let entry = reputation.entry(assignee.clone()).or_default();
            entry.total += decayed;
            entry.last_updated = Some(task.updated_at);
            for tag in &task.tags {
                *entry.tags.entry(tag.clone()).or_insert(0.0) += decayed;
            }
        }

        for proposal in channel.proposals.values() {
            for (voter, choice) in &proposal.votes {
                if !matches!(choice, VoteChoice::Yes | VoteChoice::No) {
                    continue;
                }
                let decayed = config.proposal_vote_reputation_reward * decay_factor(now, proposal.updated_at);
                if decayed < DECAY_FLOOR {
                    continue;
                }
                let entry = reputation.entry(voter.clone()).or_default();
                entry.total += decayed;
                entry.last_updated = Some(proposal.updated_at);
            }
        }
    }

    for proposal in global.proposals.values() {
        for (voter, _) in &proposal.votes {
            let decayed = config.proposal_vote_reputation_reward * decay_factor(now, proposal.updated_at);
            if decayed < DECAY_FLOOR {
                continue;
            }
            let entry = reputation.entry(voter.clone()).or_default();
            entry.total += decayed;
            entry.last_updated = Some(proposal.updated_at);
        }
    }

    for entry in reputation.values_mut() {
        entry.tags.retain(|_, value| *value >= DECAY_FLOOR);
    }

    reputation
}

/// Log-scaled base vote weight plus a tag-contextual bonus when the voter's
/// tagged reputation overlaps the proposal's declared tags.
pub fn vote_weight(reputation: &Reputation, proposal_tags: &[String], log_base: f64) -> f64 {
    let base = 1.0 + log_with_base(reputation.total + 1.0, log_base);
    let tag_sum = reputation.tag_sum(proposal_tags);
    let bonus = if tag_sum > 0.0 {
        log_with_base(tag_sum + 1.0, log_base)
    } else {
        0.0
    };
    base + bonus
}

fn log_with_base(value: f64, base: f64) -> f64 {
    value.ln() / base.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_core::state::TopicalChannel;
    use synapse_core::types::{ChannelId, Task};

    fn completed_task(assignee: NodeId, tags: Vec<String>) -> Task {
        Task {
            id: uuid::Uuid::new_v4(),
            creator: "channel:eng".to_string(),
            owner: NodeId("owner".to_string()),
            title: "ship it".to_string(),
            status: TaskStatus::Completed,
            assignee: Some(assignee),
            reward: 10.0,
            tags,
            description: "".to_string(),
            schema_name: "task_v1".to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            is_deleted: false,
            required_tools: vec![],
            auction: None,
        }
    }

    #[test]
    fn completed_task_credits_assignee_total_and_tags() {
        let global = Default::default();
        let mut channels = HashMap::new();
        let mut channel = TopicalChannel::default();
        let node = NodeId("n1".to_string());
        let task = completed_task(node.clone(), vec!["rust".to_string()]);
        channel.tasks.insert(task.id, task);
        channels.insert(ChannelId::from("eng"), channel);

        let config = EconomyConfig {
            initial_balance_sp: 0.0,
            treasury_initial_balance: 0.0,
            transaction_tax_percentage: 0.0,
            task_completion_reputation_reward: 10.0,
            proposal_vote_reputation_reward: 1.0,
            vote_weight_log_base: 2.0,
        };
        let reputation = compute_reputation(&global, &channels, &config, Utc::now());
        assert_eq!(reputation[&node].total, 10.0);
        assert_eq!(reputation[&node].tags["rust"], 10.0);
    }

    #[test]
    fn old_contributions_decay_and_eventually_drop_below_the_floor() {
        let global = Default::default();
        let mut channels = HashMap::new();
        let mut channel = TopicalChannel::default();
        let node = NodeId("n1".to_string());
        let task = completed_task(node.clone(), vec!["rust".to_string()]);
        let created_at = task.updated_at;
        channel.tasks.insert(task.id, task);
        channels.insert(ChannelId::from("eng"), channel);

        let config = EconomyConfig {
            initial_balance_sp: 0.0,
            treasury_initial_balance: 0.0,
            transaction_tax_percentage: 0.0,
            task_completion_reputation_reward: 10.0,
            proposal_vote_reputation_reward: 1.0,
            vote_weight_log_base: 2.0,
        };

        let one_day_later = compute_reputation(&global, &channels, &config, created_at + chrono::Duration::days(1));
        assert!(one_day_later[&node].total < 10.0);

        let centuries_later = compute_reputation(&global, &channels, &config, created_at + chrono::Duration::days(365 * 5));
        assert!(!centuries_later.contains_key(&node) || centuries_later[&node].tags.is_empty());
    }

    #[test]
    fn vote_weight_grows_with_tag_overlap() {
        let mut rep = Reputation::default();
        rep.total = 100.0;
        rep.tags.insert("rust".to_string(), 50.0);

        let untagged = vote_weight(&rep, &[], 2.0);
        let tagged = vote_weight(&rep, &["rust".to_string()], 2.0);
        assert!(tagged > untagged);
    }
}
