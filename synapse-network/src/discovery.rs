//! Peer discovery: three independent ways a node learns about peers it is
//! not yet connected to. All three feed the same `DiscoveryQueue`; the
//! caller drains it and decides which candidates to actually dial.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use synapse_core::types::NodeId;
use tracing::debug;

/// One peer candidate surfaced by any discovery mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub node_id: NodeId,
    pub url: String,
}

/// Accumulates peer candidates from whichever discovery modes are active
/// and lets the caller drain them once per discovery tick, deduplicated
/// against peers already known.
#[derive(Debug, Default)]
pub struct DiscoveryQueue {
    seen_ids: HashSet<NodeId>,
    pending: Vec<PeerDescriptor>,
}

impl DiscoveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn offer(&mut self, candidate: PeerDescriptor) {
        if self.seen_ids.insert(candidate.node_id.clone()) {
            self.pending.push(candidate);
        }
    }

    /// Rendezvous mode: the registry's response to a periodic sample GET.
    pub fn ingest_rendezvous_sample(&mut self, sample: Vec<PeerDescriptor>) {
        debug!(count = sample.len(), "rendezvous sample received");
        for candidate in sample {
            self.offer(candidate);
        }
    }

    /// P2P mode: peers observed inside a gossip-delivered node snapshot,
    /// beyond the bootstrap peer itself.
    pub fn ingest_gossip_observed(&mut self, observed: Vec<PeerDescriptor>) {
        for candidate in observed {
            self.offer(candidate);
        }
    }

    /// Local discovery mode: an external collaborator process (e.g. mDNS,
    /// a k8s endpoints watch) hands in peers it found out-of-band.
    pub fn ingest_local_discovery(&mut self, discovered: Vec<PeerDescriptor>) {
        for candidate in discovered {
            self.offer(candidate);
        }
    }

    /// Drains every candidate not already known, clearing the queue.
    pub fn drain(&mut self) -> Vec<PeerDescriptor> {
        std::mem::take(&mut self.pending)
    }

    pub fn known_count(&self) -> usize {
        self.seen_ids.len()
    }
}

/// Registers this node with a rendezvous registry. Returns the body to
/// POST; the actual HTTP call happens at the process-wiring layer where an
/// HTTP client is available.
pub fn rendezvous_registration_body(self_id: &NodeId, url: &str) -> serde_json::Value {
    serde_json::json!({ "node_id": self_id, "url": url })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> PeerDescriptor {
        PeerDescriptor {
            node_id: NodeId(id.to_string()),
            url: format!("http://{id}.local"),
        }
    }

    #[test]
    fn duplicate_candidates_across_modes_are_deduplicated() {
        let mut queue = DiscoveryQueue::new();
        queue.ingest_rendezvous_sample(vec![descriptor("a")]);
        queue.ingest_gossip_observed(vec![descriptor("a"), descriptor("b")]);
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn drain_empties_the_pending_queue() {
        let mut queue = DiscoveryQueue::new();
        queue.ingest_local_discovery(vec![descriptor("c")]);
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn known_count_persists_across_drains() {
        let mut queue = DiscoveryQueue::new();
        queue.ingest_rendezvous_sample(vec![descriptor("a")]);
        queue.drain();
        queue.ingest_rendezvous_sample(vec![descriptor("a")]);
        assert_eq!(queue.known_count(), 1);
        assert!(queue.drain().is_empty());
    }
}
