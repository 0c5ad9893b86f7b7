//! Anonymous weighted voting via a Fiat-Shamir commitment scheme. A voter
//! proves they hold a reputation tier without revealing which node they
//! are: the nullifier ties one vote to one (node, proposal) pair without
//! ever exposing the node id itself.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use synapse_core::types::VoteChoice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationTier {
    Novice,
    Intermediate,
    Expert,
}

impl ReputationTier {
    pub fn from_total(total: f64) -> Self {
        if total <= 50.0 {
            ReputationTier::Novice
        } else if total <= 150.0 {
            ReputationTier::Intermediate
        } else {
            ReputationTier::Expert
        }
    }

    pub fn weight(self) -> f64 {
        match self {
            ReputationTier::Novice => 1.0,
            ReputationTier::Intermediate => 1.5,
            ReputationTier::Expert => 2.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReputationTier::Novice => "novice",
            ReputationTier::Intermediate => "intermediate",
            ReputationTier::Expert => "expert",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "novice" => Some(ReputationTier::Novice),
            "intermediate" => Some(ReputationTier::Intermediate),
            "expert" => Some(ReputationTier::Expert),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ZkpError {
    #[error("nullifier already used for this proposal")]
    DoubleVote,
    #[error("unknown reputation tier {0:?}")]
    UnknownTier(String),
    #[error("proof timestamp outside the accepted window")]
    StaleTimestamp,
    #[error("challenge does not match recomputed value")]
    ChallengeMismatch,
}

/// A proof submitted alongside an anonymous vote. `tier`, `nullifier`,
/// `commitment`, `challenge`, and `response` travel over the wire;
/// `node_secret` and `vote` never do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteProof {
    pub tier: String,
    pub nullifier: String,
    pub commitment: String,
    pub challenge: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

/// `SHA256(signing_private_key)`, hex-encoded. Derived once per identity and
/// never transmitted; every nullifier and commitment is built from it.
pub fn node_secret(signing_key_bytes: &[u8]) -> String {
    hex_encode(&Sha256::digest(signing_key_bytes))
}

/// Deterministic per-(node, proposal) nullifier. Two proofs from the same
/// node against the same proposal always produce the same nullifier, which
/// is exactly what makes double-voting detectable without identifying the
/// voter.
pub fn nullifier(node_secret: &str, proposal_id: Uuid) -> String {
    let mut hasher = Sha256::new();
    hasher.update(node_secret.as_bytes());
    hasher.update(proposal_id.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Builds a proof for `reputation_total` at the current tier, caller-side.
pub fn generate_proof(node_secret: &str, proposal_id: Uuid, reputation_total: f64) -> VoteProof {
    let tier = ReputationTier::from_total(reputation_total);
    let null = nullifier(node_secret, proposal_id);

    let mut nonce_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = hex_encode(&nonce_bytes);

    let commitment = {
        let mut hasher = Sha256::new();
        hasher.update(reputation_total.to_bits().to_be_bytes());
        hasher.update(nonce.as_bytes());
        hex_encode(&hasher.finalize())
    };

    let challenge = {
        let mut hasher = Sha256::new();
        hasher.update(commitment.as_bytes());
        hasher.update(tier.as_str().as_bytes());
        hasher.update(null.as_bytes());
        hasher.update(proposal_id.as_bytes());
        hex_encode(&hasher.finalize())
    };

    let response = {
        let mut hasher = Sha256::new();
        hasher.update(nonce.as_bytes());
        hasher.update(node_secret.as_bytes());
        hasher.update(challenge.as_bytes());
        hex_encode(&hasher.finalize())
    };

    VoteProof {
        tier: tier.as_str().to_string(),
        nullifier: null,
        commitment,
        challenge,
        response,
        timestamp: Utc::now(),
    }
}

/// Verifies a proof against the proposal's already-spent nullifier set.
/// Does not (and cannot) verify `response`'s node-secret binding without
/// learning the secret itself; what this function guards is exactly what a
/// verifier without the secret can check: tier validity, freshness,
/// non-reuse, and that `challenge` really is the Fiat-Shamir hash of the
/// other public fields.
pub fn verify_proof(
    proof: &VoteProof,
    proposal_id: Uuid,
    used_nullifiers: &std::collections::HashSet<String>,
) -> Result<ReputationTier, ZkpError> {
    let tier = ReputationTier::parse(&proof.tier).ok_or_else(|| ZkpError::UnknownTier(proof.tier.clone()))?;

    if used_nullifiers.contains(&proof.nullifier) {
        return Err(ZkpError::DoubleVote);
    }

    let now = Utc::now();
    if proof.timestamp < now - Duration::hours(1) || proof.timestamp > now + Duration::minutes(1) {
        return Err(ZkpError::StaleTimestamp);
    }

    let recomputed_challenge = {
        let mut hasher = Sha256::new();
        hasher.update(proof.commitment.as_bytes());
        hasher.update(proof.tier.as_bytes());
        hasher.update(proof.nullifier.as_bytes());
        hasher.update(proposal_id.as_bytes());
        hex_encode(&hasher.finalize())
    };
    if recomputed_challenge != proof.challenge {
        return Err(ZkpError::ChallengeMismatch);
    }

    Ok(tier)
}

/// Convenience wrapper pairing a verified proof with the vote it carries,
/// ready to hand to `synapse_economy::proposals::record_anonymous_vote`.
pub fn to_vote_record(proof: &VoteProof, vote: VoteChoice) -> synapse_core::types::AnonymousVoteRecord {
    synapse_core::types::AnonymousVoteRecord {
        vote,
        tier: proof.tier.clone(),
        nullifier: proof.nullifier.clone(),
        timestamp: proof.timestamp,
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tiers_map_to_their_bucket_boundaries() {
        assert_eq!(ReputationTier::from_total(0.0), ReputationTier::Novice);
        assert_eq!(ReputationTier::from_total(50.0), ReputationTier::Novice);
        assert_eq!(ReputationTier::from_total(51.0), ReputationTier::Intermediate);
        assert_eq!(ReputationTier::from_total(150.0), ReputationTier::Intermediate);
        assert_eq!(ReputationTier::from_total(151.0), ReputationTier::Expert);
    }

    #[test]
    fn valid_proof_round_trips_through_verify() {
        let secret = node_secret(b"some-signing-key-bytes");
        let proposal_id = Uuid::new_v4();
        let proof = generate_proof(&secret, proposal_id, 80.0);

        let used = HashSet::new();
        let tier = verify_proof(&proof, proposal_id, &used).unwrap();
        assert_eq!(tier, ReputationTier::Intermediate);
    }

    #[test]
    fn reused_nullifier_is_rejected() {
        let secret = node_secret(b"key");
        let proposal_id = Uuid::new_v4();
        let proof = generate_proof(&secret, proposal_id, 10.0);

        let mut used = HashSet::new();
        used.insert(proof.nullifier.clone());
        let result = verify_proof(&proof, proposal_id, &used);
        assert!(matches!(result, Err(ZkpError::DoubleVote)));
    }

    #[test]
    fn tampered_challenge_is_rejected() {
        let secret = node_secret(b"key");
        let proposal_id = Uuid::new_v4();
        let mut proof = generate_proof(&secret, proposal_id, 10.0);
        proof.challenge = "0".repeat(64);

        let used = HashSet::new();
        let result = verify_proof(&proof, proposal_id, &used);
        assert!(matches!(result, Err(ZkpError::ChallengeMismatch)));
    }

    #[test]
    fn same_node_same_proposal_always_same_nullifier() {
        let secret = node_secret(b"key");
        let proposal_id = Uuid::new_v4();
        let a = generate_proof(&secret, proposal_id, 10.0);
        let b = generate_proof(&secret, proposal_id, 200.0);
        assert_eq!(a.nullifier, b.nullifier);
    }
}
