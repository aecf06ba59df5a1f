//! Database types for the indexer storage layer.

use alloy::primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use gavel_core::types::{ProposalStatus, TraitSeed, VoteSupport};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Encode an address as lowercase 0x-prefixed hex for storage.
pub(crate) fn encode_address(address: &Address) -> String {
    format!("{:#x}", address)
}

/// Decode an address stored as hex text.
pub(crate) fn decode_address(text: &str) -> Result<Address> {
    Address::from_str(text).with_context(|| format!("Invalid address in database: {}", text))
}

/// Encode a transaction hash as lowercase 0x-prefixed hex for storage.
pub(crate) fn encode_hash(hash: &B256) -> String {
    format!("{:#x}", hash)
}

/// Decode a transaction hash stored as hex text.
pub(crate) fn decode_hash(text: &str) -> Result<B256> {
    B256::from_str(text).with_context(|| format!("Invalid hash in database: {}", text))
}

/// Encode a wei amount as a decimal string. Amounts exceed i64, so they
/// are stored as TEXT; decimal keeps equality joins exact.
pub(crate) fn encode_amount(amount: &U256) -> String {
    amount.to_string()
}

/// Decode a wei amount stored as a decimal string.
pub(crate) fn decode_amount(text: &str) -> Result<U256> {
    U256::from_str(text).with_context(|| format!("Invalid amount in database: {}", text))
}

/// Chain coordinates identifying a single event log.
///
/// `(tx_hash, log_index)` is the idempotence key for every append-only
/// table; `(block_number, log_index)` is the total processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventMeta {
    /// Block number where the event occurred
    pub block_number: u64,

    /// Log index within the block
    pub log_index: u64,

    /// Transaction hash
    pub tx_hash: B256,

    /// Block timestamp (unix seconds)
    pub block_timestamp: i64,
}

/// A minted item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    /// Token id
    pub id: u64,

    /// Trait seed locked in at mint
    pub seed: TraitSeed,

    /// Current owner (None until the first transfer is observed)
    pub owner: Option<Address>,

    /// Whether the item has been burned
    pub burned: bool,

    /// Who settled the auction that minted this item (write-once)
    pub settled_by: Option<Address>,

    /// When that settlement landed (unix seconds)
    pub settled_at: Option<i64>,

    /// Winning bid id ("txhash:logindex"), filled at settlement
    pub winning_bid_id: Option<String>,

    /// Auction winner, filled at settlement
    pub winner: Option<Address>,

    /// Block of the mint event
    pub created_at_block: u64,

    /// Timestamp of the mint block (unix seconds)
    pub created_at_timestamp: i64,
}

/// An auction row (one per non-reward item).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionRecord {
    /// Item being auctioned
    pub item_id: u64,

    /// Auction start (unix seconds)
    pub start_time: i64,

    /// Auction end; moves forward on extensions
    pub end_time: i64,

    /// Winner, set at settlement
    pub winner: Option<Address>,

    /// Winning amount in wei, set at settlement
    pub amount: Option<U256>,

    /// Whether the auction has settled
    pub settled: bool,

    /// Reward-program client credited for the winning bid
    pub client_id: Option<u64>,
}

/// A bid (append-only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidRecord {
    /// Event coordinates
    pub meta: EventMeta,

    /// Auctioned item
    pub item_id: u64,

    /// Bidder address
    pub bidder: Address,

    /// Bid amount in wei
    pub amount: U256,

    /// Whether this bid extended the auction
    pub extended: bool,

    /// Reward-program client credited for the bid
    pub client_id: Option<u64>,
}

/// An ownership transfer (append-only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    /// Event coordinates
    pub meta: EventMeta,

    /// Transferred item
    pub item_id: u64,

    /// Previous owner (zero address for mints)
    pub from: Address,

    /// New owner (zero address for burns)
    pub to: Address,
}

/// A delegation change (append-only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationRecord {
    /// Event coordinates
    pub meta: EventMeta,

    /// Token holder changing their delegate
    pub delegator: Address,

    /// Previous delegate
    pub from_delegate: Address,

    /// New delegate
    pub to_delegate: Address,
}

/// Voter aggregates.
///
/// `delegated_votes` is overwritten from the event payload;
/// `total_votes` and `represented_item_ids` are recomputed from the
/// vote/transfer/delegation streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterRecord {
    /// Delegate address
    pub address: Address,

    /// Current delegated voting power
    pub delegated_votes: i64,

    /// Lifetime number of votes cast
    pub total_votes: u64,

    /// Item ids whose owners currently delegate to this address
    pub represented_item_ids: Vec<u64>,
}

/// A governance proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalRecord {
    /// Proposal id
    pub id: u64,

    /// Proposer address
    pub proposer: Address,

    /// Latest description
    pub description: String,

    /// Lifecycle status (forward-only)
    pub status: ProposalStatus,

    /// Block of the creation event
    pub created_at_block: u64,

    /// Timestamp of the creation block (unix seconds)
    pub created_at_timestamp: i64,

    /// Voting start block
    pub start_block: u64,

    /// Voting end block
    pub end_block: u64,

    /// For-vote tally (recomputed from the vote log)
    pub for_votes: u64,

    /// Against-vote tally
    pub against_votes: u64,

    /// Abstain tally
    pub abstain_votes: u64,

    /// When the proposal was queued (unix seconds)
    pub queued_at: Option<i64>,

    /// When the proposal was executed
    pub executed_at: Option<i64>,

    /// When the proposal was vetoed
    pub vetoed_at: Option<i64>,

    /// When the proposal was cancelled
    pub cancelled_at: Option<i64>,

    /// Reward-program client credited for the proposal
    pub client_id: Option<u64>,
}

/// One historical version of a proposal description (append-only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalVersionRecord {
    /// Event coordinates
    pub meta: EventMeta,

    /// Parent proposal
    pub proposal_id: u64,

    /// Description at this version
    pub description: String,

    /// Proposer's update message (empty for the initial version)
    pub update_message: String,

    /// Version creation time (unix seconds)
    pub created_at: i64,

    /// 1-based rank by creation time, recomputed on insert
    pub version_number: u64,
}

/// A cast vote (append-only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRecord {
    /// Event coordinates
    pub meta: EventMeta,

    /// Voted proposal
    pub proposal_id: u64,

    /// Voter address
    pub voter: Address,

    /// Support value
    pub support: VoteSupport,

    /// Voting weight at the snapshot
    pub weight: u64,

    /// Optional vote reason
    pub reason: Option<String>,

    /// Reward-program client credited for the vote
    pub client_id: Option<u64>,
}

/// A pre-proposal candidate, keyed by `"{proposer}-{slug}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    /// Candidate key
    pub id: String,

    /// Proposer address
    pub proposer: Address,

    /// URL-safe slug chosen by the proposer
    pub slug: String,

    /// Latest description
    pub description: String,

    /// Creation time (unix seconds)
    pub created_at: i64,

    /// Whether the candidate was canceled
    pub canceled: bool,

    /// Time of the latest update, if any
    pub latest_update_at: Option<i64>,

    /// Sponsor signature count, recomputed on insert
    pub signature_count: u64,
}

/// One historical version of a candidate description (append-only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateVersionRecord {
    /// Event coordinates
    pub meta: EventMeta,

    /// Parent candidate key
    pub candidate_id: String,

    /// Description at this version
    pub description: String,

    /// Proposer's update message
    pub update_message: String,

    /// Version creation time (unix seconds)
    pub created_at: i64,

    /// 1-based rank by creation time, recomputed on insert
    pub version_number: u64,
}

/// A sponsor signature on a candidate (append-only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    /// Event coordinates
    pub meta: EventMeta,

    /// Signed candidate key
    pub candidate_id: String,

    /// Signer address
    pub signer: Address,

    /// Signature bytes as hex
    pub sig: String,

    /// Signature expiry (unix seconds)
    pub expiration_timestamp: i64,

    /// Optional sponsor reason
    pub reason: Option<String>,
}

/// Off-chain-style feedback on a proposal or candidate (append-only).
///
/// Exactly one of `proposal_id` / `candidate_id` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRecord {
    /// Event coordinates
    pub meta: EventMeta,

    /// Target proposal, if proposal feedback
    pub proposal_id: Option<u64>,

    /// Target candidate key, if candidate feedback
    pub candidate_id: Option<String>,

    /// Sender address
    pub sender: Address,

    /// Support value
    pub support: VoteSupport,

    /// Optional reason text
    pub reason: Option<String>,
}

/// Direction of a treasury flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    /// ETH received by the treasury
    In,
    /// ETH sent from the treasury
    Out,
}

impl FlowDirection {
    /// Database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowDirection::In => "in",
            FlowDirection::Out => "out",
        }
    }
}

impl std::str::FromStr for FlowDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(FlowDirection::In),
            "out" => Ok(FlowDirection::Out),
            _ => Err(format!("Unknown flow direction: {}", s)),
        }
    }
}

/// A treasury flow (append-only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreasuryRecord {
    /// Event coordinates
    pub meta: EventMeta,

    /// Flow direction
    pub direction: FlowDirection,

    /// Sender (for inflows) or recipient (for outflows)
    pub counterparty: Address,

    /// Amount in wei
    pub amount: U256,
}

/// A reward-program client.
///
/// `total_rewarded` and `total_withdrawn` are overwritten from
/// authoritative on-chain reads, never summed locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    /// Client id
    pub id: u64,

    /// Display name
    pub name: String,

    /// Free-form description
    pub description: String,

    /// Badge image URI, fetched on metadata events only
    pub badge_uri: Option<String>,

    /// Lifetime rewards granted (wei)
    pub total_rewarded: U256,

    /// Lifetime rewards withdrawn (wei)
    pub total_withdrawn: U256,

    /// Block of the registration event
    pub registered_at_block: u64,
}

/// Kind of a reward-program ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardKind {
    /// Reward granted to the client
    Reward,
    /// Balance withdrawn by the client
    Withdrawal,
}

impl RewardKind {
    /// Database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardKind::Reward => "reward",
            RewardKind::Withdrawal => "withdrawal",
        }
    }
}

impl std::str::FromStr for RewardKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reward" => Ok(RewardKind::Reward),
            "withdrawal" => Ok(RewardKind::Withdrawal),
            _ => Err(format!("Unknown reward kind: {}", s)),
        }
    }
}

/// A reward grant or withdrawal (append-only audit trail).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardEventRecord {
    /// Event coordinates
    pub meta: EventMeta,

    /// Affected client
    pub client_id: u64,

    /// Entry kind
    pub kind: RewardKind,

    /// Amount in wei
    pub amount: U256,
}

/// An observed auction settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    /// Settled item (auction id)
    pub item_id: u64,

    /// Event coordinates
    pub meta: EventMeta,

    /// Transaction sender of the settlement, when known
    pub settler: Option<Address>,
}

/// A cached address-to-name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRecord {
    /// Resolved address
    pub address: Address,

    /// Resolved name; None is a cached negative result
    pub name: Option<String>,

    /// Avatar URI, when the resolver returned one
    pub avatar: Option<String>,

    /// When the resolution happened (unix seconds); drives the TTL
    pub resolved_at: i64,
}

/// Sync state record (singleton).
///
/// Tracks the indexer's progress through the chain log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// Last fully processed block number
    pub last_block_number: u64,

    /// Hash of the last processed block
    pub last_block_hash: B256,

    /// Unix timestamp of last update
    pub updated_at: i64,

    /// Chain ID (for safety)
    pub chain_id: u64,
}
