//! Sealed-bid task auctions: nodes bid cost/time against a task's posted
//! max reward, weighted against their own reputation, and the highest
//! composite score wins the assignment.

use chrono::Utc;

use synapse_core::state::TopicalChannel;
use synapse_core::types::{AuctionStatus, Bid, NodeId, TaskStatus};
use synapse_core::{SynapseError, SynapseResult};

const WEIGHT_COST: f64 = 0.4;
const WEIGHT_REPUTATION: f64 = 0.4;
const WEIGHT_TIME: f64 = 0.2;

/// Records or overwrites `caller`'s bid on an open auction (last-write-wins
/// per bidder, so a resubmission simply replaces the earlier one).
pub fn place_bid(
    channel: &mut TopicalChannel,
    task_id: uuid::Uuid,
    caller: &NodeId,
    amount: f64,
    estimated_days: f64,
    caller_reputation: f64,
) -> SynapseResult<()> {
    let task = channel
        .tasks
        .get_mut(&task_id)
        .ok_or_else(|| SynapseError::NotFound(format!("task {task_id}")))?;
    let auction = task
        .auction
        .as_mut()
        .ok_or_else(|| SynapseError::Validation("task has no auction".into()))?;

    if !auction.enabled || auction.status != AuctionStatus::Open {
        return Err(SynapseError::InvalidTransition("auction is not open".into()));
    }
    if Utc::now() > auction.deadline {
        return Err(SynapseError::InvalidTransition("auction deadline passed".into()));
    }
    if amount <= 0.0 || amount > auction.max_reward {
        return Err(SynapseError::Validation("bid amount out of range".into()));
    }
    if estimated_days <= 0.0 {
        return Err(SynapseError::Validation("estimated_days must be positive".into()));
    }

    auction.bids.insert(
        caller.clone(),
        Bid {
            amount,
            estimated_days,
            reputation: caller_reputation,
            timestamp: Utc::now(),
        },
    );
    task.updated_at = Utc::now();
    Ok(())
}

/// Scores every bid and finalizes the auction in favor of the winner.
/// Called either directly by the task owner before the deadline, or by the
/// auction closure background loop once the deadline has passed.
pub fn select_winner(channel: &mut TopicalChannel, task_id: uuid::Uuid) -> SynapseResult<Option<NodeId>> {
    let task = channel
        .tasks
        .get_mut(&task_id)
        .ok_or_else(|| SynapseError::NotFound(format!("task {task_id}")))?;
    let auction = task
        .auction
        .as_mut()
        .ok_or_else(|| SynapseError::Validation("task has no auction".into()))?;

    if auction.bids.is_empty() {
        return Ok(None);
    }

    let max_reward = auction.max_reward;
    let max_reputation = auction
        .bids
        .values()
        .map(|b| b.reputation)
        .fold(0.0_f64, f64::max);
    let max_inverse_days = auction
        .bids
        .values()
        .map(|b| 1.0 / b.estimated_days)
        .fold(0.0_f64, f64::max);

    let mut scored: Vec<(NodeId, f64)> = auction
        .bids
        .iter()
        .map(|(bidder, bid)| {
            let cost = (max_reward - bid.amount) / max_reward;
            let rep = if max_reputation > 0.0 {
                bid.reputation / max_reputation
            } else {
                0.0
            };
            let inverse_days = 1.0 / bid.estimated_days;
            let time = if max_inverse_days > 0.0 {
                inverse_days / max_inverse_days
            } else {
                0.0
            };
            let score = WEIGHT_COST * cost + WEIGHT_REPUTATION * rep + WEIGHT_TIME * time;
            (bidder.clone(), score)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let (winner, _) = scored.into_iter().next().expect("bids is non-empty");
    let winning_amount = auction.bids[&winner].amount;

    auction.status = AuctionStatus::Finalized;
    auction.selected_bid = Some(winner.clone());
    task.status = TaskStatus::Claimed;
    task.assignee = Some(winner.clone());
    task.reward = winning_amount;
    task.updated_at = Utc::now();

    Ok(Some(winner))
}

/// Reverts a bid-less expired auction back to an open, manually-claimable
/// task rather than leaving it stuck waiting for a winner that never came.
pub fn close_without_winner(channel: &mut TopicalChannel, task_id: uuid::Uuid) -> SynapseResult<()> {
    let task = channel
        .tasks
        .get_mut(&task_id)
        .ok_or_else(|| SynapseError::NotFound(format!("task {task_id}")))?;
    let auction = task
        .auction
        .as_mut()
        .ok_or_else(|| SynapseError::Validation("task has no auction".into()))?;
    auction.status = AuctionStatus::Closed;
    task.status = TaskStatus::Open;
    task.updated_at = Utc::now();
    Ok(())
}

/// Runs the periodic auction closure sweep over every channel's expired
/// open auctions: finalize if bids exist, otherwise revert to manual claim.
pub fn close_expired_auctions(channel: &mut TopicalChannel) {
    let now = Utc::now();
    let expired: Vec<uuid::Uuid> = channel
        .tasks
        .values()
        .filter(|t| {
            t.auction
                .as_ref()
                .map(|a| a.enabled && a.status == AuctionStatus::Open && now > a.deadline)
                .unwrap_or(false)
        })
        .map(|t| t.id)
        .collect();

    for task_id in expired {
        let has_bids = channel.tasks[&task_id]
            .auction
            .as_ref()
            .map(|a| !a.bids.is_empty())
            .unwrap_or(false);
        let result = if has_bids {
            select_winner(channel, task_id).map(|_| ())
        } else {
            close_without_winner(channel, task_id)
        };
        if let Err(err) = result {
            tracing::warn!(%task_id, %err, "failed to close expired auction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_core::types::{Auction, Task, TaskStatus};

    fn task_with_auction(deadline: chrono::DateTime<Utc>) -> Task {
        Task {
            id: uuid::Uuid::new_v4(),
            creator: "alice".to_string(),
            owner: NodeId("alice".to_string()),
            title: "t".to_string(),
            status: TaskStatus::AuctionOpen,
            assignee: None,
            reward: 100.0,
            tags: vec![],
            description: "".to_string(),
            schema_name: "task_v1".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_deleted: false,
            required_tools: vec![],
            auction: Some(Auction {
                enabled: true,
                status: AuctionStatus::Open,
                max_reward: 100.0,
                deadline,
                bids: Default::default(),
                selected_bid: None,
            }),
        }
    }

    #[test]
    fn cheaper_higher_reputation_faster_bid_wins() {
        let mut channel = TopicalChannel::default();
        let task = task_with_auction(Utc::now() + chrono::Duration::hours(1));
        let id = task.id;
        channel.tasks.insert(id, task);

        place_bid(&mut channel, id, &NodeId("strong".into()), 50.0, 2.0, 100.0).unwrap();
        place_bid(&mut channel, id, &NodeId("weak".into()), 90.0, 10.0, 10.0).unwrap();

        let winner = select_winner(&mut channel, id).unwrap();
        assert_eq!(winner, Some(NodeId("strong".into())));
        assert_eq!(channel.tasks[&id].reward, 50.0);
        assert_eq!(channel.tasks[&id].status, TaskStatus::Claimed);
    }

    #[test]
    fn bid_above_max_reward_rejected() {
        let mut channel = TopicalChannel::default();
        let task = task_with_auction(Utc::now() + chrono::Duration::hours(1));
        let id = task.id;
        channel.tasks.insert(id, task);

        let result = place_bid(&mut channel, id, &NodeId("n".into()), 500.0, 1.0, 10.0);
        assert!(matches!(result, Err(SynapseError::Validation(_))));
    }

    #[test]
    fn expired_auction_without_bids_reverts_to_open() {
        let mut channel = TopicalChannel::default();
        let task = task_with_auction(Utc::now() - chrono::Duration::seconds(1));
        let id = task.id;
        channel.tasks.insert(id, task);

        close_expired_auctions(&mut channel);
        assert_eq!(channel.tasks[&id].status, TaskStatus::Open);
        assert_eq!(
            channel.tasks[&id].auction.as_ref().unwrap().status,
            AuctionStatus::Closed
        );
    }
}
