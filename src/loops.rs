//! The fixed set of cooperative background tasks every node runs
//! alongside the foreground API. Each loop catches its own errors and logs
//! them rather than ever tearing down the process.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use synapse_consensus::ConsensusEngine;
use synapse_core::state::StateStore;
use synapse_core::types::{ChannelId, CommandOperation, ProposalStatus, ProposalType};
use synapse_network::{GossipHub, NetworkManager};
use tokio::task::JoinHandle;
use tracing::{info, warn};

fn jittered(base: Duration, spread: Duration) -> Duration {
    let extra_ms = rand::thread_rng().gen_range(0..=spread.as_millis() as u64);
    base + Duration::from_millis(extra_ms)
}

pub fn spawn_gossip_publish(state: StateStore, hub: Arc<GossipHub>, channels: Vec<ChannelId>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(jittered(Duration::from_secs(8), Duration::from_secs(4))).await;
            for channel in &channels {
                let payload = if channel.is_global() {
                    let snapshot = state.snapshot();
                    serde_json::to_value(&snapshot.global)
                } else {
                    let snapshot = state.snapshot();
                    let Some(topical) = snapshot.channels.get(channel).cloned() else {
                        continue;
                    };
                    serde_json::to_value(&topical)
                };
                match payload {
                    Ok(value) => {
                        hub.publish(&channel.0, value);
                    }
                    Err(err) => warn!(%err, channel = %channel.0, "failed to serialize channel snapshot for gossip"),
                }
            }
        }
    })
}

pub fn spawn_peer_discovery(network: Arc<NetworkManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(jittered(Duration::from_secs(5), Duration::from_secs(5))).await;
            // Rendezvous sampling happens at the process-wiring layer where
            // an HTTP client is available; this tick just drains whatever
            // has already been offered into the queue.
            let new_peers = network.run_discovery_tick(Vec::new());
            if !new_peers.is_empty() {
                info!(count = new_peers.len(), "discovered new peer candidates");
            }
        }
    })
}

pub fn spawn_validator_election(state: StateStore, consensus: Arc<ConsensusEngine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let interval = state.with_state(|root| {
                root.global.config.0.governance.validator_election_interval_seconds
            });
            tokio::time::sleep(Duration::from_secs(interval.max(1))).await;
            let economy_config = state.with_state(|root| root.global.config.0.economy.clone());
            consensus.run_validator_election(&economy_config);
        }
    })
}

pub fn spawn_proposal_auto_close(state: StateStore, consensus: Arc<ConsensusEngine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60 * 60)).await;
            let now = chrono::Utc::now();
            let after = state.with_state(|root| root.global.config.0.governance.proposal_auto_close_after_seconds);

            let closed = state.with_state(|root| {
                let economy_config = root.global.config.0.economy.clone();
                let reputations = synapse_economy::compute_reputation(&root.global, &root.channels, &economy_config, now);
                let mut actions = Vec::new();
                for channel in root.channels.values_mut() {
                    let due: Vec<uuid::Uuid> = channel
                        .proposals
                        .values()
                        .filter(|p| p.status == ProposalStatus::Open)
                        .filter(|p| (now - p.created_at).num_seconds() as u64 >= after)
                        .map(|p| p.id)
                        .collect();
                    for proposal_id in due {
                        let proposal_type = channel.proposals[&proposal_id].proposal_type;
                        let command = channel.proposals[&proposal_id].command.clone();
                        let params = channel.proposals[&proposal_id].params.clone();
                        match synapse_economy::proposals::close(channel, proposal_id, &reputations, &economy_config) {
                            Ok(action) => actions.push((proposal_id, proposal_type, command, params, action)),
                            Err(err) => warn!(%proposal_id, %err, "failed to auto-close proposal"),
                        }
                    }
                }

                for (proposal_id, _, _, params, action) in &actions {
                    if *action == synapse_economy::proposals::CloseAction::ApplyConfigChange {
                        if let Err(err) = synapse_core::config::apply_config_change(&mut root.global.config.0, params) {
                            warn!(%proposal_id, %err, "config_change proposal approved but could not be applied");
                        }
                    }
                }
                actions
            });

            for (proposal_id, proposal_type, command, _params, action) in closed {
                dispatch_close_action(&consensus, proposal_id, proposal_type, command, action);
            }
        }
    })
}

fn dispatch_close_action(
    consensus: &ConsensusEngine,
    proposal_id: uuid::Uuid,
    proposal_type: ProposalType,
    command: Option<String>,
    action: synapse_economy::proposals::CloseAction,
) {
    use synapse_economy::proposals::CloseAction;
    match action {
        CloseAction::None | CloseAction::Rejected | CloseAction::ApplyConfigChange => {}
        CloseAction::ExecuteCommandNow => {
            let Some(operation) = command.as_deref().and_then(CommandOperation::parse) else {
                warn!(%proposal_id, ?proposal_type, "command proposal approved but its command field did not name a known operation");
                return;
            };
            consensus.execute_command_now(proposal_id, operation);
            info!(%proposal_id, "command proposal executed");
        }
        CloseAction::EnqueueForRatification => {
            let Some(operation) = command.as_deref().and_then(CommandOperation::parse) else {
                warn!(%proposal_id, "network_operation/code_upgrade proposal had no resolvable command");
                return;
            };
            if let Err(err) = consensus.enqueue_for_ratification(proposal_id, operation) {
                warn!(%proposal_id, %err, "failed to enqueue proposal for ratification");
            }
        }
    }
}

pub fn spawn_auction_closure(state: StateStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(30)).await;
            state.with_state(|root| {
                for channel in root.channels.values_mut() {
                    synapse_economy::auctions::close_expired_auctions(channel);
                }
            });
        }
    })
}

pub fn spawn_command_executor(state: StateStore, consensus: Arc<ConsensusEngine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let config = state.with_state(|root| root.global.config.0.economy.clone());
            consensus.run_command_executor(&config);
        }
    })
}

pub fn spawn_common_tool_maintenance(state: StateStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
            let now = chrono::Utc::now();
            state.with_state(|root| {
                let config = root.global.config.0.economy.clone();
                let treasuries = synapse_economy::compute_treasuries(&root.channels, &config);
                for (channel_id, channel) in root.channels.iter_mut() {
                    let treasury = treasuries.get(channel_id).copied().unwrap_or(config.treasury_initial_balance);
                    synapse_economy::run_billing(channel, treasury, now);
                }
            });
        }
    })
}

pub fn spawn_mesh_optimization(state: StateStore, network: Arc<NetworkManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(5 * 60)).await;
            let now = chrono::Utc::now();
            let (reputations, peer_scoring) = state.with_state(|root| {
                let economy_config = root.global.config.0.economy.clone();
                let reputations = synapse_economy::compute_reputation(&root.global, &root.channels, &economy_config, now);
                let totals = reputations.into_iter().map(|(id, r)| (id, r.total)).collect();
                (totals, root.global.config.0.peer_scoring.clone())
            });
            let pruned = network.run_scoring_tick(&reputations, &peer_scoring, now);
            if !pruned.is_empty() {
                info!(count = pruned.len(), "pruning low-scoring peers");
            }
        }
    })
}
