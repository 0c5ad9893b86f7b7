//! Deterministic replay of ratified commands. Every node scans
//! `execution_log[last_executed_command_index + 1 ..]` in order and
//! dispatches each entry through this module; because the log is an
//! append-only CRDT, every node that has seen the same prefix computes the
//! same side effects regardless of when it caught up.

use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;

use synapse_core::config::EconomyConfig;
use synapse_core::state::{GlobalChannel, TopicalChannel};
use synapse_core::types::{ChannelId, Command, CommandOperation, CommonTool, CommonToolStatus};
use synapse_core::{SynapseError, SynapseResult};

/// Replays every not-yet-applied command in order, advancing
/// `last_executed_command_index` unconditionally — a failing command still
/// counts as applied, so replay stays deterministic and never retries.
pub fn run_pending(global: &mut GlobalChannel, channels: &mut HashMap<ChannelId, TopicalChannel>, config: &EconomyConfig) {
    let start = (global.last_executed_command_index + 1).max(0) as usize;
    let commands: Vec<Command> = global.execution_log.get(start..).unwrap_or(&[]).to_vec();

    for (offset, command) in commands.into_iter().enumerate() {
        let result = dispatch(global, channels, &command, config);
        if let Some(proposal) = global.proposals.get_mut(&command.proposal_id) {
            match &result {
                Ok(value) => {
                    proposal.status = synapse_core::types::ProposalStatus::Executed;
                    proposal.execution_result = Some(value.clone());
                }
                Err(err) => {
                    proposal.status = synapse_core::types::ProposalStatus::Failed;
                    proposal.execution_result = Some(serde_json::json!({ "error": err.to_string() }));
                }
            }
            proposal.updated_at = Utc::now();
        }
        if let Err(err) = &result {
            tracing::warn!(command_id = %command.command_id, %err, "command execution failed");
        }
        global.last_executed_command_index = (start + offset) as i64;
    }
}

fn dispatch(
    global: &mut GlobalChannel,
    channels: &mut HashMap<ChannelId, TopicalChannel>,
    command: &Command,
    config: &EconomyConfig,
) -> SynapseResult<serde_json::Value> {
    match command.operation {
        CommandOperation::SplitChannel => split_channel(channels, &command.params),
        CommandOperation::MergeChannels => merge_channels(channels, &command.params),
        CommandOperation::UpdateSchema => update_schema(global, &command.params),
        CommandOperation::AcquireCommonTool => acquire_common_tool(channels, &command.params, config),
        CommandOperation::DeprecateCommonTool => deprecate_common_tool(channels, &command.params),
        CommandOperation::ExecuteUpgrade => execute_upgrade(&command.params),
    }
}

#[derive(Deserialize)]
struct SplitChannelParams {
    target: String,
    new_channels: Vec<String>,
    split_logic: String,
    #[serde(default)]
    split_params: HashMap<String, Vec<String>>,
}

fn split_channel(channels: &mut HashMap<ChannelId, TopicalChannel>, params: &serde_json::Value) -> SynapseResult<serde_json::Value> {
    let params: SplitChannelParams = serde_json::from_value(params.clone())
        .map_err(|e| SynapseError::Validation(format!("bad split_channel params: {e}")))?;
    let source_id = ChannelId::from(params.target.as_str());

    for name in &params.new_channels {
        channels.entry(ChannelId::from(name.as_str())).or_default();
    }

    let source = channels.entry(source_id.clone()).or_default().clone();
    for (task_id, task) in &source.tasks {
        let Some(destination) = route_channel(&params.split_logic, &task.tags, &task.title, &params.new_channels, &params.split_params) else {
            continue;
        };
        channels.entry(ChannelId::from(destination)).or_default().tasks.insert(*task_id, task.clone());
    }
    for (proposal_id, proposal) in &source.proposals {
        let Some(destination) = route_channel(&params.split_logic, &proposal.tags, &proposal.title, &params.new_channels, &params.split_params) else {
            continue;
        };
        channels.entry(ChannelId::from(destination)).or_default().proposals.insert(*proposal_id, proposal.clone());
    }

    channels.entry(source_id).or_default().archived = true;
    Ok(serde_json::json!({ "new_channels": params.new_channels }))
}

fn route_channel<'a>(
    logic: &str,
    tags: &[String],
    title: &str,
    new_channels: &'a [String],
    split_params: &HashMap<String, Vec<String>>,
) -> Option<&'a str> {
    match logic {
        "by_tag" => new_channels.iter().find(|channel| {
            split_params
                .get(*channel)
                .map(|required_tags| required_tags.iter().any(|t| tags.contains(t)))
                .unwrap_or(false)
        }).map(|s| s.as_str()),
        "by_title_prefix" => new_channels.iter().find(|channel| {
            split_params
                .get(*channel)
                .map(|prefixes| prefixes.iter().any(|p| title.starts_with(p.as_str())))
                .unwrap_or(false)
        }).map(|s| s.as_str()),
        _ => None,
    }
}

#[derive(Deserialize)]
struct MergeChannelsParams {
    sources: Vec<String>,
    target: String,
}

fn merge_channels(channels: &mut HashMap<ChannelId, TopicalChannel>, params: &serde_json::Value) -> SynapseResult<serde_json::Value> {
    let params: MergeChannelsParams = serde_json::from_value(params.clone())
        .map_err(|e| SynapseError::Validation(format!("bad merge_channels params: {e}")))?;
    let target_id = ChannelId::from(params.target.as_str());
    channels.entry(target_id.clone()).or_default();

    for source_name in &params.sources {
        let source_id = ChannelId::from(source_name.as_str());
        let Some(source) = channels.get(&source_id).cloned() else {
            continue;
        };
        let target = channels.get_mut(&target_id).expect("just inserted above");
        for (id, task) in source.tasks {
            target.tasks.entry(id).or_insert(task);
        }
        for (id, proposal) in source.proposals {
            target.proposals.entry(id).or_insert(proposal);
        }
        target.participants.extend(source.participants);
        channels.entry(source_id).or_default().archived = true;
    }

    Ok(serde_json::json!({ "target": params.target }))
}

fn update_schema(global: &mut GlobalChannel, params: &serde_json::Value) -> SynapseResult<serde_json::Value> {
    let schema: synapse_schema::SchemaDocument = serde_json::from_value(params.clone())
        .map_err(|e| SynapseError::Validation(format!("bad update_schema params: {e}")))?;
    let mut schema = schema;
    schema.updated_at = Utc::now();
    let name = schema.schema_name.clone();
    global.schemas.insert(name.clone(), schema);
    Ok(serde_json::json!({ "schema_name": name }))
}

#[derive(Deserialize)]
struct AcquireCommonToolParams {
    channel: String,
    tool_id: String,
    description: String,
    #[serde(rename = "type")]
    tool_type: String,
    monthly_cost_sp: f64,
    credentials_to_encrypt: String,
}

fn acquire_common_tool(
    channels: &mut HashMap<ChannelId, TopicalChannel>,
    params: &serde_json::Value,
    config: &EconomyConfig,
) -> SynapseResult<serde_json::Value> {
    let params: AcquireCommonToolParams = serde_json::from_value(params.clone())
        .map_err(|e| SynapseError::Validation(format!("bad acquire_common_tool params: {e}")))?;
    let channel_id = ChannelId::from(params.channel.as_str());

    let treasuries = synapse_economy::compute_treasuries(channels, config);
    let available = treasuries.get(&channel_id).copied().unwrap_or(config.treasury_initial_balance);
    if available < params.monthly_cost_sp {
        return Err(SynapseError::InsufficientFunds {
            needed: params.monthly_cost_sp,
            available,
        });
    }

    let key = synapse_security::credentials::derive_channel_key(&params.channel, b"synapse-ng-common-tool-salt");
    let encrypted_credentials = synapse_security::credentials::encrypt(&key, &params.credentials_to_encrypt)
        .map_err(|e| SynapseError::Fatal(format!("credential encryption failed: {e}")))?;

    let tool = CommonTool {
        tool_id: params.tool_id.clone(),
        description: params.description,
        tool_type: params.tool_type,
        status: CommonToolStatus::Active,
        monthly_cost_sp: params.monthly_cost_sp,
        last_payment_at: Utc::now(),
        deprecated_at: None,
        encrypted_credentials,
    };
    channels.entry(channel_id).or_default().common_tools.insert(params.tool_id.clone(), tool);
    Ok(serde_json::json!({ "tool_id": params.tool_id }))
}

#[derive(Deserialize)]
struct DeprecateCommonToolParams {
    channel: String,
    tool_id: String,
}

fn deprecate_common_tool(channels: &mut HashMap<ChannelId, TopicalChannel>, params: &serde_json::Value) -> SynapseResult<serde_json::Value> {
    let params: DeprecateCommonToolParams = serde_json::from_value(params.clone())
        .map_err(|e| SynapseError::Validation(format!("bad deprecate_common_tool params: {e}")))?;
    let channel = channels
        .get_mut(&ChannelId::from(params.channel.as_str()))
        .ok_or_else(|| SynapseError::NotFound(format!("channel {}", params.channel)))?;
    let tool = channel
        .common_tools
        .get_mut(&params.tool_id)
        .ok_or_else(|| SynapseError::NotFound(format!("common tool {}", params.tool_id)))?;
    tool.status = CommonToolStatus::Deprecated;
    tool.deprecated_at = Some(Utc::now());
    Ok(serde_json::json!({ "tool_id": params.tool_id }))
}

fn execute_upgrade(params: &serde_json::Value) -> SynapseResult<serde_json::Value> {
    // Code upgrades are recorded, not actually applied: a ratified upgrade
    // marker tells operators which binary version the network has agreed
    // to run next, applied out-of-band by the deployment process.
    Ok(serde_json::json!({ "recorded": true, "params": params }))
}
