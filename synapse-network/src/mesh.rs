//! Per-topic pub/sub mesh state: which peers care about a topic, and which
//! message ids this node has already seen, so gossip never loops forever.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use synapse_core::types::NodeId;
use uuid::Uuid;

const SEEN_CACHE_CAP: usize = 1000;
const SEEN_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Default)]
pub struct TopicMesh {
    pub peers: HashSet<NodeId>,
    seen: HashMap<Uuid, DateTime<Utc>>,
}

impl TopicMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_announce(&mut self, sender: NodeId) {
        self.peers.insert(sender);
    }

    /// Marks `message_id` seen and returns `true` if it was already known
    /// (i.e. this message should not be re-delivered to the local handler
    /// or re-forwarded).
    pub fn mark_seen(&mut self, message_id: Uuid) -> bool {
        let already_seen = self.seen.contains_key(&message_id);
        self.seen.insert(message_id, Utc::now());
        already_seen
    }

    /// Peers this message should be forwarded to: the whole mesh minus the
    /// node that just sent it (gossip push).
    pub fn forward_targets(&self, exclude: &NodeId) -> Vec<NodeId> {
        self.peers.iter().filter(|p| *p != exclude).cloned().collect()
    }

    /// Drops entries over the cap (oldest first) and anything older than
    /// [`SEEN_TTL`]. Called periodically, not on every insert, since seen
    /// message volume is bursty.
    pub fn trim_seen(&mut self) {
        let cutoff = Utc::now() - chrono::Duration::from_std(SEEN_TTL).unwrap();
        self.seen.retain(|_, seen_at| *seen_at >= cutoff);

        if self.seen.len() > SEEN_CACHE_CAP {
            let mut entries: Vec<(Uuid, DateTime<Utc>)> = self.seen.iter().map(|(k, v)| (*k, *v)).collect();
            entries.sort_by_key(|(_, seen_at)| *seen_at);
            let overflow = entries.len() - SEEN_CACHE_CAP;
            for (id, _) in entries.into_iter().take(overflow) {
                self.seen.remove(&id);
            }
        }
    }
}
