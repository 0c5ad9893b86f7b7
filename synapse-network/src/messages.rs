//! The wire format for the pub/sub mesh: every message that crosses a
//! direct peer connection is one of these six types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use synapse_core::types::NodeId;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Announce,
    Message,
    IHave,
    IWant,
    Ping,
    Pong,
}

/// `signature` is URL-safe base64 of the Ed25519 signature over the
/// canonicalized `payload`, empty for message types that carry no state
/// (`ANNOUNCE`, `I_HAVE`, `I_WANT`, `PING`, `PONG`). `MESSAGE` packets carry
/// a channel snapshot and are signed by the sender and verified by every
/// recipient before `GossipHub` ever merges them into local state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub topic: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub sender_id: NodeId,
    pub timestamp: DateTime<Utc>,
    pub message_id: Uuid,
    #[serde(default)]
    pub signature: String,
}

impl GossipMessage {
    pub fn new(message_type: MessageType, topic: &str, sender_id: NodeId, payload: serde_json::Value) -> Self {
        Self {
            message_type,
            topic: topic.to_string(),
            payload,
            sender_id,
            timestamp: Utc::now(),
            message_id: Uuid::new_v4(),
            signature: String::new(),
        }
    }

    pub fn announce(topic: &str, sender_id: NodeId, subscribed_channels: &[String]) -> Self {
        Self::new(
            MessageType::Announce,
            topic,
            sender_id,
            serde_json::json!({ "channels": subscribed_channels }),
        )
    }

    pub fn publish(topic: &str, sender_id: NodeId, payload: serde_json::Value) -> Self {
        Self::new(MessageType::Message, topic, sender_id, payload)
    }
}
