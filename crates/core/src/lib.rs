//! Core domain types for the Gavel materialization engine.
//!
//! This crate is deliberately free of I/O: it holds the shared vocabulary
//! (proposal lifecycle, vote support, item trait seeds), the
//! settlement-attribution rule as pure functions, and the error taxonomy
//! used by the indexer's handlers and outbound clients.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribution;
pub mod error;
pub mod types;

pub use attribution::{is_reward_item, settled_id};
pub use error::{EngineError, Result};
pub use types::{ProposalStatus, TraitSeed, VoteSupport};
