//! The pub/sub mesh overlay: signed message wire format, per-topic mesh
//! membership, peer quality scoring, and peer discovery. Everything here is
//! transport-agnostic plain Rust operating on already-received bytes; the
//! process-wiring layer owns the actual socket/transport and hands framed
//! messages to [`GossipHub::handle_inbound`].

pub mod discovery;
pub mod gossip;
pub mod mesh;
pub mod messages;
pub mod scorer;

pub use discovery::{DiscoveryQueue, PeerDescriptor};
pub use gossip::{GossipHub, SharedGossipHub};
pub use messages::{GossipMessage, MessageType};
pub use scorer::{score, PeerStats};

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use synapse_core::identity::NodeIdentity;
use synapse_core::state::StateStore;
use synapse_core::types::NodeId;
use tracing::info;

/// Network-layer configuration: bootstrap peers, rendezvous registry, and
/// the mesh pruning/scoring interval.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub listen_url: String,
    pub bootstrap_peers: Vec<String>,
    pub rendezvous_url: Option<String>,
    pub discovery_interval: std::time::Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_url: "http://127.0.0.1:7000".to_string(),
            bootstrap_peers: Vec::new(),
            rendezvous_url: None,
            discovery_interval: std::time::Duration::from_secs(30),
        }
    }
}

/// Owns the gossip mesh, peer quality stats, and the discovery queue for
/// one running node. The process-wiring layer drives `start`/`stop` and
/// periodically calls `run_discovery_tick`/`run_scoring_tick` from its
/// background loops.
pub struct NetworkManager {
    self_id: NodeId,
    config: NetworkConfig,
    hub: SharedGossipHub,
    discovery: RwLock<DiscoveryQueue>,
    peer_stats: RwLock<HashMap<NodeId, PeerStats>>,
}

impl NetworkManager {
    pub fn new(identity: Arc<NodeIdentity>, config: NetworkConfig, state: StateStore) -> Self {
        Self {
            self_id: identity.node_id().clone(),
            hub: Arc::new(GossipHub::new(identity, state)),
            config,
            discovery: RwLock::new(DiscoveryQueue::new()),
            peer_stats: RwLock::new(HashMap::new()),
        }
    }

    pub fn hub(&self) -> SharedGossipHub {
        self.hub.clone()
    }

    pub async fn start(&self) -> Result<()> {
        info!(node_id = %self.self_id.0, listen_url = %self.config.listen_url, "starting network manager");
        if let Some(rendezvous) = &self.config.rendezvous_url {
            info!(rendezvous, "registering with rendezvous registry");
        }
        for peer in &self.config.bootstrap_peers {
            info!(peer, "dialing bootstrap peer");
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!(node_id = %self.self_id.0, "stopping network manager");
        Ok(())
    }

    /// Offers newly discovered peers from any discovery mode into the
    /// shared queue and drains the ones not already known.
    pub fn run_discovery_tick(&self, rendezvous_sample: Vec<PeerDescriptor>) -> Vec<PeerDescriptor> {
        let mut queue = self.discovery.write();
        queue.ingest_rendezvous_sample(rendezvous_sample);
        queue.drain()
    }

    pub fn record_peer_connected(&self, peer: NodeId, now: chrono::DateTime<chrono::Utc>) {
        self.peer_stats.write().entry(peer).or_insert_with(|| PeerStats::new(now));
    }

    /// Scores every tracked peer against the given reputation snapshot and
    /// returns the ones recommended for pruning.
    pub fn run_scoring_tick(
        &self,
        reputations: &HashMap<NodeId, f64>,
        config: &synapse_core::config::PeerScoringConfig,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Vec<NodeId> {
        let stats = self.peer_stats.read();
        let max_reputation_seen = reputations
            .values()
            .cloned()
            .fold(config.max_reputation_seen_floor, f64::max);

        let scored: Vec<(NodeId, f64)> = stats
            .iter()
            .map(|(id, s)| {
                let reputation = reputations.get(id).cloned().unwrap_or(0.0);
                (id.clone(), scorer::score(s, reputation, max_reputation_seen, config, now))
            })
            .collect();

        scorer::prune_candidates(&scored, config).into_iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_and_stop_succeed_with_no_peers() {
        let manager = NetworkManager::new(Arc::new(NodeIdentity::generate()), NetworkConfig::default(), StateStore::new());
        manager.start().await.unwrap();
        manager.stop().await.unwrap();
    }

    #[test]
    fn discovery_tick_surfaces_new_rendezvous_peers() {
        let manager = NetworkManager::new(Arc::new(NodeIdentity::generate()), NetworkConfig::default(), StateStore::new());
        let sample = vec![PeerDescriptor {
            node_id: NodeId("peer-a".into()),
            url: "http://peer-a.local".into(),
        }];
        let drained = manager.run_discovery_tick(sample);
        assert_eq!(drained.len(), 1);
    }
}
