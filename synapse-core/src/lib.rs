//! Shared foundation for every Synapse-NG crate: node identity, the domain
//! entities that live in replicated channel state, the single-mutex state
//! store, the CRDT merge engine, runtime configuration, and the common
//! error type.
//!
//! Deliberately depends on nothing beyond `synapse-schema`: every other
//! crate in the workspace depends on this one, not the other way around.

pub mod config;
pub mod error;
pub mod identity;
pub mod merge;
pub mod state;
pub mod types;

pub use error::{SynapseError, SynapseResult};
pub use identity::NodeIdentity;
pub use state::{StateSnapshot, StateStore};
