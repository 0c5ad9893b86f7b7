//! Runtime configuration tree: every governance-mutable tunable the economy,
//! peer scorer, and validator election read lives here behind a single
//! `Arc<RwLock<RuntimeConfig>>`. A `config_change` proposal is the only
//! writer; everything else only reads a cloned snapshot.
//!
//! ## Configuration sources (in order of precedence)
//! 1. Command-line flags (`--data-dir`, `--own-url`, `--channel`, ...)
//! 2. Environment variables (`SYNAPSE_<SECTION>_<FIELD>`)
//! 3. An optional `config.json` in the data directory
//! 4. Defaults below

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration object, serialized as the `global.config` CRDT entry
/// whenever a `config_change` proposal is ratified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub config_version: u64,
    pub economy: EconomyConfig,
    pub peer_scoring: PeerScoringConfig,
    pub governance: GovernanceConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyConfig {
    pub initial_balance_sp: f64,
    pub treasury_initial_balance: f64,
    pub transaction_tax_percentage: f64,
    pub task_completion_reputation_reward: f64,
    pub proposal_vote_reputation_reward: f64,
    pub vote_weight_log_base: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerScoringConfig {
    pub weight_reputation: f64,
    pub weight_stability: f64,
    pub weight_latency: f64,
    pub max_peer_connections: usize,
    pub protected_peer_count: usize,
    pub max_reputation_seen_floor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    pub validator_set_size: usize,
    pub validator_election_interval_seconds: u64,
    pub proposal_auto_close_after_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub max_disconnect_rate_per_hour: f64,
    pub max_command_lag: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_version: 1,
            economy: EconomyConfig {
                initial_balance_sp: 1000.0,
                treasury_initial_balance: 0.0,
                transaction_tax_percentage: 0.02,
                task_completion_reputation_reward: 10.0,
                proposal_vote_reputation_reward: 1.0,
                vote_weight_log_base: 2.0,
            },
            peer_scoring: PeerScoringConfig {
                weight_reputation: 0.5,
                weight_stability: 0.3,
                weight_latency: 0.2,
                max_peer_connections: 50,
                protected_peer_count: 5,
                max_reputation_seen_floor: 1.0,
            },
            governance: GovernanceConfig {
                validator_set_size: 7,
                validator_election_interval_seconds: 300,
                proposal_auto_close_after_seconds: 3600,
            },
            health: HealthConfig {
                max_disconnect_rate_per_hour: 10.0,
                max_command_lag: 100,
            },
        }
    }
}

/// Applies a `config_change` proposal's `{"key": "section.field", "value": ...}`
/// payload in place. The key must name an existing field and the new value
/// must be the same JSON type as the current one; `config_version` bumps on
/// success and never otherwise.
pub fn apply_config_change(
    config: &mut RuntimeConfig,
    params: &serde_json::Value,
) -> Result<(), String> {
    let key = params
        .get("key")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "config_change params missing string \"key\"".to_string())?;
    let new_value = params
        .get("value")
        .ok_or_else(|| "config_change params missing \"value\"".to_string())?;

    let mut tree = serde_json::to_value(&*config).map_err(|e| e.to_string())?;
    let (section, field) = key
        .split_once('.')
        .ok_or_else(|| format!("config key \"{key}\" is not of the form \"section.field\""))?;

    let slot = tree
        .get_mut(section)
        .and_then(|s| s.get_mut(field))
        .ok_or_else(|| format!("unknown config key \"{key}\""))?;

    if std::mem::discriminant(slot) != std::mem::discriminant(new_value) {
        return Err(format!(
            "type mismatch for config key \"{key}\": expected {slot}, got {new_value}"
        ));
    }
    *slot = new_value.clone();

    let mut updated: RuntimeConfig = serde_json::from_value(tree).map_err(|e| e.to_string())?;
    updated.config_version = config.config_version + 1;
    *config = updated;
    Ok(())
}

/// Process-level settings read once at startup from the environment; not
/// part of the replicated `RuntimeConfig` and never governance-mutable.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub own_url: String,
    pub data_dir: PathBuf,
    pub rendezvous_url: Option<String>,
    pub bootstrap_peers: Vec<String>,
    pub subscribed_channels: Vec<String>,
    pub ice_servers: Vec<String>,
    pub local_discovery_enabled: bool,
}

impl NodeConfig {
    /// Build from environment variables, mirroring the precedence order
    /// documented above. Missing optional variables fall back to sensible
    /// single-node defaults so the binary can start without any setup.
    pub fn from_env() -> Self {
        let own_url =
            std::env::var("SYNAPSE_OWN_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".into());
        let data_dir = std::env::var("SYNAPSE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let rendezvous_url = std::env::var("SYNAPSE_RENDEZVOUS_URL").ok();
        let bootstrap_peers = split_csv_env("SYNAPSE_BOOTSTRAP_PEERS");
        let subscribed_channels = {
            let mut channels = split_csv_env("SYNAPSE_CHANNELS");
            if channels.is_empty() {
                channels.push("global".to_string());
            }
            channels
        };
        let ice_servers = split_csv_env("SYNAPSE_ICE_SERVERS");
        let local_discovery_enabled = std::env::var("SYNAPSE_LOCAL_DISCOVERY")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            own_url,
            data_dir,
            rendezvous_url,
            bootstrap_peers,
            subscribed_channels,
            ice_servers,
            local_discovery_enabled,
        }
    }
}

fn split_csv_env(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub structured: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_version_starts_at_one() {
        assert_eq!(RuntimeConfig::default().config_version, 1);
    }

    #[test]
    fn node_config_defaults_to_global_channel() {
        std::env::remove_var("SYNAPSE_CHANNELS");
        let config = NodeConfig::from_env();
        assert_eq!(config.subscribed_channels, vec!["global".to_string()]);
    }

    #[test]
    fn config_change_updates_value_and_bumps_version() {
        let mut config = RuntimeConfig::default();
        apply_config_change(
            &mut config,
            &serde_json::json!({ "key": "economy.transaction_tax_percentage", "value": 0.05 }),
        )
        .unwrap();
        assert_eq!(config.economy.transaction_tax_percentage, 0.05);
        assert_eq!(config.config_version, 2);
    }

    #[test]
    fn config_change_rejects_unknown_key() {
        let mut config = RuntimeConfig::default();
        let result = apply_config_change(&mut config, &serde_json::json!({ "key": "economy.nope", "value": 1.0 }));
        assert!(result.is_err());
        assert_eq!(config.config_version, 1);
    }

    #[test]
    fn config_change_rejects_type_mismatch() {
        let mut config = RuntimeConfig::default();
        let result = apply_config_change(
            &mut config,
            &serde_json::json!({ "key": "governance.validator_set_size", "value": "seven" }),
        );
        assert!(result.is_err());
        assert_eq!(config.config_version, 1);
    }
}
