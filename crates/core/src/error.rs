//! Error taxonomy for the materialization engine.

use thiserror::Error;

/// Errors surfaced by handlers and outbound clients.
///
/// Each variant maps to a distinct recovery policy:
/// decode failures are skipped, transient failures are retried with
/// backoff, unresolved attribution is retried on a schedule, rate limits
/// back off the whole batch, and failed aggregate reads keep the prior
/// stored value.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or undecodable event log. Skip and continue.
    #[error("Failed to decode event log: {0}")]
    Decode(String),

    /// Transient network failure. Retry with exponential backoff.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Settlement log not yet available for the item. Leave the
    /// settlement fields null and retry later; never fabricate a value.
    #[error("Settlement attribution unresolved for item {item_id}")]
    UnresolvedAttribution {
        /// The item whose settler could not be determined yet.
        item_id: u64,
    },

    /// External endpoint signalled rate limiting. Back off the whole
    /// batch, not just the failing lookup.
    #[error("Rate limited by external endpoint")]
    RateLimited,

    /// Authoritative on-chain aggregate read failed. Keep the prior
    /// local value and retry; never fall back to local arithmetic.
    #[error("Authoritative aggregate read failed for client {client_id}: {message}")]
    AggregateRead {
        /// Reward-program client whose balances could not be read.
        client_id: u64,
        /// Underlying failure description.
        message: String,
    },

    /// Invalid lifecycle value encountered in stored data.
    #[error("Unknown proposal status: {0}")]
    UnknownStatus(String),

    /// Invalid vote support value.
    #[error("Invalid vote support: {0} (must be 0, 1 or 2)")]
    InvalidSupport(u8),
}

/// Result type alias for [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;
