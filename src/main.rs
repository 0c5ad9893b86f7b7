//! Process entry point: wires identity, state, economy, security, consensus
//! and network into one running node, then waits for a shutdown signal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use synapse_consensus::ConsensusEngine;
use synapse_core::config::NodeConfig;
use synapse_core::identity::NodeIdentity;
use synapse_core::state::StateStore;
use synapse_core::types::{ChannelId, NodeId};
use synapse_network::{NetworkConfig, NetworkManager};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod loops;

/// Command-line overrides, applied on top of the environment-derived
/// defaults. This is the highest-precedence configuration source; anything
/// left unset here falls through to `NodeConfig::from_env()`.
#[derive(Parser, Debug)]
#[command(name = "synapse-ng", about = "A decentralized P2P collaboration node")]
struct Cli {
    /// Override the data directory holding this node's persisted identity.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override this node's own advertised URL.
    #[arg(long)]
    own_url: Option<String>,

    /// Override the rendezvous registry URL used for bootstrap discovery.
    #[arg(long)]
    rendezvous_url: Option<String>,

    /// Channel to subscribe to at startup. May be repeated.
    #[arg(long = "channel")]
    channels: Vec<String>,

    /// Bootstrap peer URL to dial at startup. May be repeated.
    #[arg(long = "bootstrap-peer")]
    bootstrap_peers: Vec<String>,
}

impl Cli {
    fn apply_to(self, mut config: NodeConfig) -> NodeConfig {
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(own_url) = self.own_url {
            config.own_url = own_url;
        }
        if self.rendezvous_url.is_some() {
            config.rendezvous_url = self.rendezvous_url;
        }
        if !self.channels.is_empty() {
            config.subscribed_channels = self.channels;
        }
        if !self.bootstrap_peers.is_empty() {
            config.bootstrap_peers = self.bootstrap_peers;
        }
        config
    }
}

/// Owns every subsystem handle for one running node and drives its
/// lifecycle in dependency order: identity → state → consensus → network →
/// background loops.
pub struct SynapseNode {
    self_id: NodeId,
    identity: Arc<NodeIdentity>,
    state: StateStore,
    consensus: Arc<ConsensusEngine>,
    network: Arc<NetworkManager>,
    subscribed_channels: Vec<ChannelId>,
    background_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SynapseNode {
    pub async fn new() -> Result<Self> {
        Self::new_with_config(NodeConfig::from_env()).await
    }

    pub async fn new_with_config(config: NodeConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

        let identity = NodeIdentity::load_or_create(&config.data_dir)
            .await
            .context("loading or creating node identity")?;
        let self_id = identity.node_id().clone();
        info!(node_id = %self_id.0, "node identity ready");

        let state = StateStore::new();
        let consensus = Arc::new(ConsensusEngine::new(self_id.clone(), state.clone()));
        let network_config = NetworkConfig {
            listen_url: config.own_url.clone(),
            bootstrap_peers: config.bootstrap_peers.clone(),
            rendezvous_url: config.rendezvous_url.clone(),
            discovery_interval: std::time::Duration::from_secs(30),
        };
        let identity = Arc::new(identity);
        let network = Arc::new(NetworkManager::new(identity.clone(), network_config, state.clone()));

        let subscribed_channels = config
            .subscribed_channels
            .iter()
            .map(|name| ChannelId::from(name.as_str()))
            .collect();

        Ok(Self {
            self_id,
            identity,
            state,
            consensus,
            network,
            subscribed_channels,
            background_tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub async fn start(&self) -> Result<()> {
        info!(node_id = %self.self_id.0, "starting synapse node");
        self.network.start().await.context("starting network manager")?;

        for channel in &self.subscribed_channels {
            self.network.hub().subscribe(&channel.0, &[channel.0.clone()]);
        }

        let mut tasks = self.background_tasks.lock().expect("background task lock poisoned");
        tasks.push(loops::spawn_gossip_publish(self.state.clone(), self.network.hub(), self.subscribed_channels.clone()));
        tasks.push(loops::spawn_peer_discovery(self.network.clone()));
        tasks.push(loops::spawn_validator_election(self.state.clone(), self.consensus.clone()));
        tasks.push(loops::spawn_proposal_auto_close(self.state.clone(), self.consensus.clone()));
        tasks.push(loops::spawn_auction_closure(self.state.clone()));
        tasks.push(loops::spawn_command_executor(self.state.clone(), self.consensus.clone()));
        tasks.push(loops::spawn_common_tool_maintenance(self.state.clone()));
        tasks.push(loops::spawn_mesh_optimization(self.state.clone(), self.network.clone()));

        info!("all background loops started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!(node_id = %self.self_id.0, "stopping synapse node");
        let tasks = {
            let mut guard = self.background_tasks.lock().expect("background task lock poisoned");
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            task.abort();
        }
        self.network.stop().await.context("stopping network manager")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("synapse_ng=info".parse()?))
        .json()
        .init();

    info!("starting synapse-ng node");

    let config = Cli::parse().apply_to(NodeConfig::from_env());
    let node = match SynapseNode::new_with_config(config).await {
        Ok(node) => node,
        Err(e) => {
            error!("failed to initialize node: {e}");
            return Err(e);
        }
    };

    if let Err(e) = node.start().await {
        error!("failed to start node: {e}");
        return Err(e);
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(err) => warn!("unable to listen for shutdown signal: {err}"),
    }

    if let Err(e) = node.stop().await {
        error!("error during shutdown: {e}");
        return Err(e);
    }

    info!("synapse-ng node stopped");
    Ok(())
}
