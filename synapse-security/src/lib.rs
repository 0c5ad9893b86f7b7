//! Anonymous voting proofs and common-tool credential encryption: the two
//! places the network needs cryptography beyond node identity itself
//! (which lives in `synapse-core::identity`).

pub mod credentials;
pub mod zkp;

pub use zkp::{generate_proof, node_secret, nullifier, verify_proof, ReputationTier, VoteProof, ZkpError};
