//! The state store: one exclusive mutex guarding the entire replicated
//! state tree. Every mutation — local API calls, gossip merges, ratified
//! command replay, background loops — takes this lock for as short a time
//! as possible, typically just long enough to clone a subtree, and never
//! while awaiting network or disk I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use synapse_schema::SchemaDocument;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::types::{
    ChannelId, Command, CommonTool, NodeId, NodeRecord, NullifierSet, Proposal,
    RatificationVotes, Task,
};

/// The distinguished cross-cutting channel's data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalChannel {
    pub nodes: HashMap<NodeId, NodeRecord>,
    pub config: RuntimeConfigSlot,
    pub schemas: HashMap<String, SchemaDocument>,
    pub validator_set: Vec<NodeId>,
    pub validator_set_updated_at: chrono::DateTime<chrono::Utc>,
    pub execution_log: Vec<Command>,
    pub ratification_votes: HashMap<Uuid, RatificationVotes>,
    pub pending_operations: HashSet<Uuid>,
    pub proposals: HashMap<Uuid, Proposal>,
    pub zkp_nullifiers: HashMap<Uuid, NullifierSet>,
    #[serde(skip)]
    pub last_executed_command_index: i64,
}

/// Wraps `RuntimeConfig` so the `Default` derive on `GlobalChannel` can
/// supply one without requiring `RuntimeConfig: Default` to thread through
/// serde skip semantics awkwardly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfigSlot(pub RuntimeConfig);

impl Default for RuntimeConfigSlot {
    fn default() -> Self {
        RuntimeConfigSlot(RuntimeConfig::default())
    }
}

impl Default for GlobalChannel {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            config: RuntimeConfigSlot::default(),
            schemas: synapse_schema::builtin_schemas(),
            validator_set: Vec::new(),
            validator_set_updated_at: chrono::Utc::now(),
            execution_log: Vec::new(),
            ratification_votes: HashMap::new(),
            pending_operations: HashSet::new(),
            proposals: HashMap::new(),
            zkp_nullifiers: HashMap::new(),
            last_executed_command_index: -1,
        }
    }
}

/// A topical (non-global) channel's data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicalChannel {
    pub participants: HashSet<NodeId>,
    pub tasks: HashMap<Uuid, Task>,
    pub proposals: HashMap<Uuid, Proposal>,
    pub common_tools: HashMap<String, CommonTool>,
    pub archived: bool,
}

/// The complete state tree for one node, behind a single lock.
#[derive(Debug, Default)]
pub struct StateRoot {
    pub global: GlobalChannel,
    pub channels: HashMap<ChannelId, TopicalChannel>,
}

impl StateRoot {
    pub fn channel(&self, id: &ChannelId) -> Option<&TopicalChannel> {
        self.channels.get(id)
    }

    pub fn channel_mut(&mut self, id: &ChannelId) -> &mut TopicalChannel {
        self.channels.entry(id.clone()).or_default()
    }
}

/// Cloneable handle to the shared state; every component holds one of these
/// rather than taking ownership of the mutex directly.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<StateRoot>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StateRoot::default())),
        }
    }

    /// Take the lock just long enough to run `f` against the state; `f`
    /// must never perform I/O or await anything.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut StateRoot) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Clone out a consistent snapshot of the whole tree for read-only
    /// derived computation (reputation, balances, scoring) outside the lock.
    pub fn snapshot(&self) -> StateSnapshot {
        let guard = self.inner.lock();
        StateSnapshot {
            global: guard.global.clone(),
            channels: guard.channels.clone(),
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable deep copy of the state tree, used by pure calculators and
/// outbound gossip packets so the mutex is never held during I/O.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub global: GlobalChannel,
    pub channels: HashMap<ChannelId, TopicalChannel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_carries_builtin_schemas() {
        let store = StateStore::new();
        let snapshot = store.snapshot();
        assert!(snapshot.global.schemas.contains_key("task_v1"));
        assert!(snapshot.global.schemas.contains_key("task_v2"));
        assert!(snapshot.global.schemas.contains_key("proposal_v1"));
    }

    #[test]
    fn with_state_mutates_in_place() {
        let store = StateStore::new();
        store.with_state(|state| {
            state.global.nodes.insert(
                NodeId("n1".to_string()),
                NodeRecord {
                    url: "http://localhost".to_string(),
                    kx_public_key: "key".to_string(),
                    last_seen: chrono::Utc::now(),
                    version: 1,
                },
            );
        });
        let snapshot = store.snapshot();
        assert_eq!(snapshot.global.nodes.len(), 1);
    }

    #[test]
    fn channel_mut_creates_on_demand() {
        let store = StateStore::new();
        store.with_state(|state| {
            let channel = state.channel_mut(&ChannelId::from("engineering"));
            channel.participants.insert(NodeId("n1".to_string()));
        });
        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.channels[&ChannelId::from("engineering")]
                .participants
                .len(),
            1
        );
    }
}
