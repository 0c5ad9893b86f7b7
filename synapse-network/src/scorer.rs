//! Per-peer connection quality scoring, used by the mesh optimizer to
//! decide which peers to keep when the connection count is over budget.

use chrono::{DateTime, Utc};
use synapse_core::config::PeerScoringConfig;

#[derive(Debug, Clone)]
pub struct PeerStats {
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_uptime: chrono::Duration,
    pub disconnect_count: u32,
    pub latency_ms: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl PeerStats {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            connected_at: now,
            last_seen: now,
            total_uptime: chrono::Duration::zero(),
            disconnect_count: 0,
            latency_ms: 0.0,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    pub fn stability(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - self.connected_at).num_milliseconds().max(1) as f64;
        let uptime_fraction = (self.total_uptime.num_milliseconds() as f64 / elapsed).min(1.0);
        uptime_fraction / (1.0 + 0.1 * self.disconnect_count as f64)
    }
}

/// `w_rep*rep_norm + w_stab*stability - w_lat*lat_norm`, clamped to `[0,1]`.
pub fn score(stats: &PeerStats, reputation: f64, max_reputation_seen: f64, config: &PeerScoringConfig, now: DateTime<Utc>) -> f64 {
    let rep_norm = if max_reputation_seen > 0.0 {
        (reputation / max_reputation_seen).min(1.0)
    } else {
        0.0
    };
    let lat_norm = (stats.latency_ms / 1000.0).min(1.0);
    let stability = stats.stability(now);

    let raw = config.weight_reputation * rep_norm + config.weight_stability * stability
        - config.weight_latency * lat_norm;
    raw.clamp(0.0, 1.0)
}

/// Peers beyond `max_peer_connections`, lowest score first, excluding the
/// `protected_peer_count` highest scorers — those are never pruned even if
/// the connection budget is over.
pub fn prune_candidates<'a>(
    scored: &'a [(synapse_core::types::NodeId, f64)],
    config: &PeerScoringConfig,
) -> Vec<&'a synapse_core::types::NodeId> {
    if scored.len() <= config.max_peer_connections {
        return Vec::new();
    }
    let mut ranked: Vec<&(synapse_core::types::NodeId, f64)> = scored.iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let protected: std::collections::HashSet<&synapse_core::types::NodeId> = ranked
        .iter()
        .take(config.protected_peer_count)
        .map(|(id, _)| id)
        .collect();

    ranked
        .iter()
        .skip(config.max_peer_connections.max(config.protected_peer_count))
        .map(|(id, _)| id)
        .filter(|id| !protected.contains(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_core::types::NodeId;

    fn config() -> PeerScoringConfig {
        PeerScoringConfig {
            weight_reputation: 0.5,
            weight_stability: 0.3,
            weight_latency: 0.2,
            max_peer_connections: 2,
            protected_peer_count: 1,
            max_reputation_seen_floor: 1.0,
        }
    }

    #[test]
    fn fresh_peer_has_zero_stability() {
        let now = Utc::now();
        let stats = PeerStats::new(now);
        assert_eq!(stats.stability(now), 0.0);
    }

    #[test]
    fn score_is_clamped_to_unit_interval() {
        let now = Utc::now();
        let mut stats = PeerStats::new(now - chrono::Duration::hours(1));
        stats.total_uptime = chrono::Duration::hours(1);
        stats.latency_ms = 5000.0;
        let s = score(&stats, 1000.0, 100.0, &config(), now);
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn prune_excludes_protected_top_scorers() {
        let scored = vec![
            (NodeId("best".into()), 0.9),
            (NodeId("mid".into()), 0.5),
            (NodeId("worst".into()), 0.1),
        ];
        let candidates = prune_candidates(&scored, &config());
        assert!(!candidates.contains(&&NodeId("best".into())));
    }
}
