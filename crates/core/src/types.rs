//! Shared domain types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;

/// Proposal lifecycle status.
///
/// The declaration order is the lifecycle rank: a stored status may only
/// move forward through this order, never backward. Terminal states
/// additionally freeze the row (see [`ProposalStatus::is_terminal`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    /// Created, voting not yet open.
    Pending,
    /// Within the proposer's update window.
    Updatable,
    /// Voting open.
    Active,
    /// Late objection window after a flipped outcome.
    ObjectionPeriod,
    /// Vote passed, awaiting queueing.
    Succeeded,
    /// Queued in the timelock.
    Queued,
    /// Executed from the timelock.
    Executed,
    /// Vote failed.
    Defeated,
    /// Vetoed by the vetoer.
    Vetoed,
    /// Cancelled by the proposer.
    Cancelled,
    /// Queued but never executed within the grace period.
    Expired,
}

impl ProposalStatus {
    /// Lifecycle rank used for the forward-only merge rule.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Updatable => 1,
            Self::Active => 2,
            Self::ObjectionPeriod => 3,
            Self::Succeeded => 4,
            Self::Queued => 5,
            Self::Executed => 6,
            Self::Defeated => 7,
            Self::Vetoed => 8,
            Self::Cancelled => 9,
            Self::Expired => 10,
        }
    }

    /// Whether this status ends the lifecycle. Terminal rows never
    /// transition again, regardless of rank.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Executed | Self::Defeated | Self::Vetoed | Self::Cancelled | Self::Expired
        )
    }

    /// Statuses considered "active" by the read-side views.
    pub const ACTIVE_SET: [ProposalStatus; 4] = [
        Self::Pending,
        Self::Updatable,
        Self::Active,
        Self::ObjectionPeriod,
    ];

    /// Apply the forward-only merge rule: returns the status the stored
    /// row should hold after observing `incoming`.
    pub fn merge(current: Self, incoming: Self) -> Self {
        if current.is_terminal() {
            return current;
        }
        if incoming.rank() > current.rank() {
            incoming
        } else {
            current
        }
    }

    /// Database string representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Updatable => "UPDATABLE",
            Self::Active => "ACTIVE",
            Self::ObjectionPeriod => "OBJECTION_PERIOD",
            Self::Succeeded => "SUCCEEDED",
            Self::Queued => "QUEUED",
            Self::Executed => "EXECUTED",
            Self::Defeated => "DEFEATED",
            Self::Vetoed => "VETOED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProposalStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "UPDATABLE" => Ok(Self::Updatable),
            "ACTIVE" => Ok(Self::Active),
            "OBJECTION_PERIOD" => Ok(Self::ObjectionPeriod),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "QUEUED" => Ok(Self::Queued),
            "EXECUTED" => Ok(Self::Executed),
            "DEFEATED" => Ok(Self::Defeated),
            "VETOED" => Ok(Self::Vetoed),
            "CANCELLED" => Ok(Self::Cancelled),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(EngineError::UnknownStatus(other.to_string())),
        }
    }
}

/// Vote support value as emitted on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteSupport {
    /// Vote against.
    Against,
    /// Vote for.
    For,
    /// Abstain.
    Abstain,
}

impl VoteSupport {
    /// Parse the raw uint8 support value.
    pub fn from_raw(value: u8) -> Result<Self, EngineError> {
        match value {
            0 => Ok(Self::Against),
            1 => Ok(Self::For),
            2 => Ok(Self::Abstain),
            other => Err(EngineError::InvalidSupport(other)),
        }
    }

    /// Raw uint8 representation (matches the on-chain encoding).
    pub const fn as_raw(self) -> u8 {
        match self {
            Self::Against => 0,
            Self::For => 1,
            Self::Abstain => 2,
        }
    }
}

/// Random trait seed assigned to an item at mint time.
///
/// Trait indices are immutable once set; the store never updates them
/// after the first insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitSeed {
    /// Background trait index.
    pub background: u64,
    /// Body trait index.
    pub body: u64,
    /// Accessory trait index.
    pub accessory: u64,
    /// Head trait index.
    pub head: u64,
    /// Glasses trait index.
    pub glasses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ProposalStatus::Pending,
            ProposalStatus::Updatable,
            ProposalStatus::Active,
            ProposalStatus::ObjectionPeriod,
            ProposalStatus::Succeeded,
            ProposalStatus::Queued,
            ProposalStatus::Executed,
            ProposalStatus::Defeated,
            ProposalStatus::Vetoed,
            ProposalStatus::Cancelled,
            ProposalStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<ProposalStatus>().unwrap(), status);
        }
        assert!("BOGUS".parse::<ProposalStatus>().is_err());
    }

    #[test]
    fn test_merge_moves_forward_only() {
        assert_eq!(
            ProposalStatus::merge(ProposalStatus::Pending, ProposalStatus::Active),
            ProposalStatus::Active
        );
        // A stale lower-rank event never moves the status backward.
        assert_eq!(
            ProposalStatus::merge(ProposalStatus::Queued, ProposalStatus::Active),
            ProposalStatus::Queued
        );
    }

    #[test]
    fn test_merge_terminal_is_frozen() {
        for terminal in [
            ProposalStatus::Executed,
            ProposalStatus::Defeated,
            ProposalStatus::Vetoed,
            ProposalStatus::Cancelled,
            ProposalStatus::Expired,
        ] {
            assert!(terminal.is_terminal());
            assert_eq!(
                ProposalStatus::merge(terminal, ProposalStatus::Expired),
                terminal
            );
            assert_eq!(
                ProposalStatus::merge(terminal, ProposalStatus::Pending),
                terminal
            );
        }
    }

    #[test]
    fn test_vote_support_raw() {
        assert_eq!(VoteSupport::from_raw(0).unwrap(), VoteSupport::Against);
        assert_eq!(VoteSupport::from_raw(1).unwrap(), VoteSupport::For);
        assert_eq!(VoteSupport::from_raw(2).unwrap(), VoteSupport::Abstain);
        assert!(VoteSupport::from_raw(3).is_err());
        assert_eq!(VoteSupport::Abstain.as_raw(), 2);
    }
}
