//! Domain types shared across every Synapse-NG crate: node identifiers, the
//! task/proposal/auction entities that live in channel state, and the
//! append-only execution log that the validator council produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Stable node identifier: URL-safe base64 of the node's Ed25519 public key, unpadded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// Channel identifier. `"global"` is the distinguished cross-cutting channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn global() -> Self {
        ChannelId("global".to_string())
    }

    pub fn is_global(&self) -> bool {
        self.0 == "global"
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        ChannelId(s.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        ChannelId(s)
    }
}

/// Identifies who a task's reward debits/credits flow to: a node's personal
/// balance, or a channel's shared treasury.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FundingSource {
    Node(NodeId),
    Treasury(ChannelId),
}

impl FundingSource {
    /// Parse the wire representation used in `task.creator`: either a bare
    /// node id, or `"channel:<id>"` for treasury-funded tasks.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("channel:") {
            Some(channel) => FundingSource::Treasury(ChannelId(channel.to_string())),
            None => FundingSource::Node(NodeId(raw.to_string())),
        }
    }

    pub fn to_wire(&self) -> String {
        match self {
            FundingSource::Node(id) => id.0.clone(),
            FundingSource::Treasury(channel) => format!("channel:{}", channel.0),
        }
    }
}

/// A single entry in the `global.nodes` directory, LWW-merged on `last_seen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub url: String,
    pub kx_public_key: String,
    pub last_seen: DateTime<Utc>,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    AuctionOpen,
    AuctionClosed,
    Claimed,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub amount: f64,
    pub estimated_days: f64,
    pub reputation: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    Open,
    Closed,
    Finalized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub enabled: bool,
    pub status: AuctionStatus,
    pub max_reward: f64,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub bids: HashMap<NodeId, Bid>,
    pub selected_bid: Option<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub creator: String,
    pub owner: NodeId,
    pub title: String,
    pub status: TaskStatus,
    pub assignee: Option<NodeId>,
    pub reward: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub description: String,
    pub schema_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub required_tools: Vec<String>,
    pub auction: Option<Auction>,
}

impl Task {
    pub fn funding_source(&self) -> FundingSource {
        FundingSource::parse(&self.creator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalType {
    Generic,
    ConfigChange,
    NetworkOperation,
    Command,
    CodeUpgrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Open,
    Closed,
    Executed,
    Failed,
    PendingRatification,
    Ratified,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    Yes,
    No,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymousVoteRecord {
    pub vote: VoteChoice,
    pub tier: String,
    pub nullifier: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub proposal_type: ProposalType,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub schema_name: String,
    pub proposer: NodeId,
    pub status: ProposalStatus,
    #[serde(default)]
    pub votes: HashMap<NodeId, VoteChoice>,
    #[serde(default)]
    pub anonymous_votes: Vec<AnonymousVoteRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub outcome: Option<String>,
    pub execution_result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOperation {
    SplitChannel,
    MergeChannels,
    UpdateSchema,
    AcquireCommonTool,
    DeprecateCommonTool,
    ExecuteUpgrade,
}

impl CommandOperation {
    /// Maps a `command`-typed proposal's free-text `command` field onto the
    /// fixed operation set the executor understands.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "split_channel" => Some(Self::SplitChannel),
            "merge_channels" => Some(Self::MergeChannels),
            "update_schema" => Some(Self::UpdateSchema),
            "acquire_common_tool" => Some(Self::AcquireCommonTool),
            "deprecate_common_tool" => Some(Self::DeprecateCommonTool),
            "execute_upgrade" => Some(Self::ExecuteUpgrade),
            _ => None,
        }
    }
}

/// An immutable, ratified entry in `global.execution_log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: Uuid,
    pub proposal_id: Uuid,
    pub operation: CommandOperation,
    pub params: serde_json::Value,
    pub ratified_at: DateTime<Utc>,
    pub ratified_by: Vec<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonTool {
    pub tool_id: String,
    pub description: String,
    pub tool_type: String,
    pub status: CommonToolStatus,
    pub monthly_cost_sp: f64,
    pub last_payment_at: DateTime<Utc>,
    pub deprecated_at: Option<DateTime<Utc>>,
    pub encrypted_credentials: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommonToolStatus {
    Active,
    Suspended,
    Deprecated,
}

/// Per-node reputation, derived fresh from a state snapshot; never persisted directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reputation {
    pub total: f64,
    pub last_updated: Option<DateTime<Utc>>,
    pub tags: HashMap<String, f64>,
}

impl Reputation {
    pub fn tag_sum(&self, tags: &[String]) -> f64 {
        tags.iter().map(|t| self.tags.get(t).copied().unwrap_or(0.0)).sum()
    }
}

/// Set of nullifiers already spent against a given proposal.
pub type NullifierSet = HashSet<String>;

/// Set of validator ids who have voted to ratify a pending operation.
pub type RatificationVotes = HashSet<NodeId>;
