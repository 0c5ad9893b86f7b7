//! Everything derived from, or mutating, the task/proposal/auction economy:
//! pure reputation and balance calculators, and the schema-validated entity
//! operations that create and transition tasks, proposals, and auctions.

pub mod auctions;
pub mod balance;
pub mod proposals;
pub mod reputation;
pub mod tasks;
pub mod tools;

pub use balance::{compute_balances, compute_treasuries, tax_for};
pub use reputation::{compute_reputation, vote_weight};
pub use tools::run_billing;
