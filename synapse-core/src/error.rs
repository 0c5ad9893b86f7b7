//! The single error enum shared by every library crate. The root binary
//! flattens these into `anyhow::Result` at its outermost boundary; library
//! code always returns `Result<T, SynapseError>` so callers can match on
//! the specific failure kind (§7 error handling design).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynapseError {
    #[error("schema validation failed: {0}")]
    Validation(String),

    #[error("signature verification failed")]
    Auth,

    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("conflicting vote: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
}

pub type SynapseResult<T> = Result<T, SynapseError>;
