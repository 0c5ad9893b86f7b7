//! Validator election: a pure, deterministic function of a reputation
//! snapshot. Nothing here is negotiated between nodes — every node that has
//! converged on the same reputation numbers converges on the same
//! validator set independently.

use std::collections::HashMap;

use synapse_core::types::{NodeId, Reputation};

/// Top-`size` nodes by total reputation, ties broken by node id ascending
/// for a deterministic order regardless of hash-map iteration.
pub fn elect_validators(reputations: &HashMap<NodeId, Reputation>, size: usize) -> Vec<NodeId> {
    let mut ranked: Vec<(&NodeId, f64)> = reputations.iter().map(|(id, rep)| (id, rep.total)).collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(size).map(|(id, _)| id.clone()).collect()
}

/// Whether the freshly computed validator set differs from the stored one,
/// in which case the caller should replace it and stamp
/// `validator_set_updated_at`.
pub fn has_changed(current: &[NodeId], elected: &[NodeId]) -> bool {
    current != elected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep(total: f64) -> Reputation {
        Reputation {
            total,
            last_updated: None,
            tags: HashMap::new(),
        }
    }

    #[test]
    fn elects_top_n_by_total_reputation() {
        let mut reputations = HashMap::new();
        reputations.insert(NodeId("a".into()), rep(10.0));
        reputations.insert(NodeId("b".into()), rep(30.0));
        reputations.insert(NodeId("c".into()), rep(20.0));

        let elected = elect_validators(&reputations, 2);
        assert_eq!(elected, vec![NodeId("b".into()), NodeId("c".into())]);
    }

    #[test]
    fn ties_break_by_node_id_ascending() {
        let mut reputations = HashMap::new();
        reputations.insert(NodeId("z".into()), rep(10.0));
        reputations.insert(NodeId("a".into()), rep(10.0));

        let elected = elect_validators(&reputations, 2);
        assert_eq!(elected, vec![NodeId("a".into()), NodeId("z".into())]);
    }

    #[test]
    fn unchanged_set_reports_no_change() {
        let set = vec![NodeId("a".into())];
        assert!(!has_changed(&set, &set.clone()));
        assert!(has_changed(&set, &[]));
    }
}
