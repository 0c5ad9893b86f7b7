//! Ties the per-topic mesh state to the CRDT merge engine: an inbound
//! channel snapshot is signature-verified, then schema-validated entity by
//! entity as part of `merge_global`/`merge_topical`, then merged into local
//! state. An unsigned or badly signed packet never reaches the merge step.

use std::sync::Arc;

use dashmap::DashMap;
use synapse_core::identity::{self, NodeIdentity};
use synapse_core::state::{GlobalChannel, StateStore, TopicalChannel};
use synapse_core::types::{ChannelId, NodeId};
use tracing::{debug, warn};

use crate::mesh::TopicMesh;
use crate::messages::{GossipMessage, MessageType};

/// One node's view of the whole pub/sub mesh: a `TopicMesh` per topic plus
/// the shared state store merges land in.
pub struct GossipHub {
    self_id: NodeId,
    identity: Arc<NodeIdentity>,
    state: StateStore,
    topics: DashMap<String, TopicMesh>,
}

impl GossipHub {
    pub fn new(identity: Arc<NodeIdentity>, state: StateStore) -> Self {
        Self {
            self_id: identity.node_id().clone(),
            identity,
            state,
            topics: DashMap::new(),
        }
    }

    /// Subscribes to a topic and returns the `ANNOUNCE` to fan out to every
    /// direct peer.
    pub fn subscribe(&self, topic: &str, subscribed_channels: &[String]) -> GossipMessage {
        self.topics.entry(topic.to_string()).or_insert_with(TopicMesh::new);
        GossipMessage::announce(topic, self.self_id.clone(), subscribed_channels)
    }

    /// Handles any inbound message, returning the set of peers (if any)
    /// this node should forward it to next.
    pub fn handle_inbound(&self, message: &GossipMessage) -> Vec<NodeId> {
        let mut mesh = self.topics.entry(message.topic.clone()).or_insert_with(TopicMesh::new);
        match message.message_type {
            MessageType::Announce => {
                mesh.on_announce(message.sender_id.clone());
                Vec::new()
            }
            MessageType::Message => {
                if mesh.mark_seen(message.message_id) {
                    return Vec::new();
                }
                if let Err(err) =
                    identity::verify_value(&message.sender_id, &message.payload, &message.signature)
                {
                    warn!(topic = %message.topic, sender = %message.sender_id, %err, "dropping gossip packet with invalid signature");
                    return Vec::new();
                }
                self.apply_channel_snapshot(&message.topic, &message.payload);
                mesh.forward_targets(&message.sender_id)
            }
            MessageType::IHave | MessageType::IWant | MessageType::Ping | MessageType::Pong => Vec::new(),
        }
    }

    /// Publishes a locally originated message: signs the payload so every
    /// recipient can authenticate it, marks it seen so a loopback copy
    /// never re-triggers the handler, and fans it out to the mesh.
    pub fn publish(&self, topic: &str, payload: serde_json::Value) -> (GossipMessage, Vec<NodeId>) {
        let mut message = GossipMessage::publish(topic, self.self_id.clone(), payload);
        match self.identity.sign_value(&message.payload) {
            Ok(signature) => message.signature = signature,
            Err(err) => warn!(topic, %err, "failed to sign outbound gossip payload"),
        }
        let mut mesh = self.topics.entry(topic.to_string()).or_insert_with(TopicMesh::new);
        mesh.mark_seen(message.message_id);
        let targets = mesh.peers.iter().cloned().collect();
        (message, targets)
    }

    fn apply_channel_snapshot(&self, topic: &str, payload: &serde_json::Value) {
        if topic == "global" {
            let Ok(incoming) = serde_json::from_value::<GlobalChannel>(payload.clone()) else {
                warn!(topic, "dropping malformed global channel snapshot");
                return;
            };
            self.state.with_state(|root| {
                synapse_core::merge::merge_global(&mut root.global, &incoming);
            });
        } else {
            let Ok(incoming) = serde_json::from_value::<TopicalChannel>(payload.clone()) else {
                warn!(topic, "dropping malformed topical channel snapshot");
                return;
            };
            self.state.with_state(|root| {
                let schemas = root.global.schemas.clone();
                let local = root.channel_mut(&ChannelId::from(topic));
                synapse_core::merge::merge_topical(local, &incoming, &schemas);
            });
        }
        debug!(topic, "merged inbound channel snapshot");
    }

    pub fn mesh_size(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|m| m.peers.len()).unwrap_or(0)
    }
}

pub type SharedGossipHub = Arc<GossipHub>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_adds_sender_to_mesh() {
        let hub = GossipHub::new(Arc::new(NodeIdentity::generate()), StateStore::new());
        let announce = GossipMessage::announce("global", NodeId("peer".into()), &["global".into()]);
        hub.handle_inbound(&announce);
        assert_eq!(hub.mesh_size("global"), 1);
    }

    #[test]
    fn duplicate_message_is_not_forwarded_twice() {
        let hub = GossipHub::new(Arc::new(NodeIdentity::generate()), StateStore::new());
        let peer = NodeIdentity::generate();
        let announce = GossipMessage::announce("global", peer.node_id().clone(), &["global".into()]);
        hub.handle_inbound(&announce);

        let payload = serde_json::to_value(GlobalChannel::default()).unwrap();
        let mut message = GossipMessage::publish("global", peer.node_id().clone(), payload.clone());
        message.signature = peer.sign_value(&payload).unwrap();
        let first = hub.handle_inbound(&message);
        let second = hub.handle_inbound(&message);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn message_with_invalid_signature_is_dropped_and_never_forwarded() {
        let hub = GossipHub::new(Arc::new(NodeIdentity::generate()), StateStore::new());
        let peer = NodeIdentity::generate();
        let payload = serde_json::to_value(GlobalChannel::default()).unwrap();
        let mut message = GossipMessage::publish("global", peer.node_id().clone(), payload);
        message.signature = "not-a-real-signature".to_string();

        let forwarded = hub.handle_inbound(&message);
        assert!(forwarded.is_empty());
    }

    #[test]
    fn message_with_missing_signature_is_dropped() {
        let hub = GossipHub::new(Arc::new(NodeIdentity::generate()), StateStore::new());
        let peer = NodeIdentity::generate();
        let payload = serde_json::to_value(GlobalChannel::default()).unwrap();
        let message = GossipMessage::publish("global", peer.node_id().clone(), payload);

        let forwarded = hub.handle_inbound(&message);
        assert!(forwarded.is_empty());
    }

    #[test]
    fn publish_signs_the_outbound_payload_so_peers_can_verify_it() {
        let hub = GossipHub::new(Arc::new(NodeIdentity::generate()), StateStore::new());
        let payload = serde_json::to_value(GlobalChannel::default()).unwrap();
        let (message, _) = hub.publish("global", payload.clone());
        identity::verify_value(&message.sender_id, &payload, &message.signature).unwrap();
    }
}
