//! Common-tool monthly billing: debits the owning channel's treasury once a
//! month per active tool, suspending any tool the treasury can no longer
//! afford.

use chrono::{DateTime, Utc};
use synapse_core::state::TopicalChannel;
use synapse_core::types::CommonToolStatus;

const BILLING_PERIOD_DAYS: i64 = 30;

/// Runs one billing pass over a channel's active tools. Returns the total
/// amount debited from the channel's effective treasury this pass; the
/// caller is expected to have already computed the treasury balance via
/// [`crate::compute_treasuries`] and subtract the result, or reject the
/// debit and suspend instead when it would go negative.
pub fn run_billing(channel: &mut TopicalChannel, current_treasury: f64, now: DateTime<Utc>) -> f64 {
    let mut remaining_treasury = current_treasury;
    let mut total_debited = 0.0;

    for tool in channel.common_tools.values_mut() {
        if tool.status != CommonToolStatus::Active {
            continue;
        }
        let days_since_payment = (now - tool.last_payment_at).num_days();
        if days_since_payment < BILLING_PERIOD_DAYS {
            continue;
        }
        if remaining_treasury >= tool.monthly_cost_sp {
            remaining_treasury -= tool.monthly_cost_sp;
            total_debited += tool.monthly_cost_sp;
            tool.last_payment_at = now;
        } else {
            tool.status = CommonToolStatus::Suspended;
        }
    }

    total_debited
}
