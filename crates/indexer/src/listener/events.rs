//! Event type definitions for the protocol contracts.
//!
//! Every log the indexer consumes is decoded here into a [`ChainEvent`].
//! Logs that fail to decode are the caller's problem to skip; nothing in
//! this module aborts a batch.

use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use gavel_core::types::{ProposalStatus, TraitSeed, VoteSupport};

use crate::storage::EventMeta;

sol! {
    /// Trait seed assigned at mint.
    #[derive(Debug, PartialEq, Eq)]
    struct ItemSeed {
        uint48 background;
        uint48 body;
        uint48 accessory;
        uint48 head;
        uint48 glasses;
    }

    // Token contract
    event ItemCreated(uint256 indexed itemId, ItemSeed seed);
    event ItemBurned(uint256 indexed itemId);
    event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
    event DelegateChanged(address indexed delegator, address indexed fromDelegate, address indexed toDelegate);
    event DelegateVotesChanged(address indexed delegate, uint256 previousBalance, uint256 newBalance);

    // Auction house contract
    event AuctionCreated(uint256 indexed itemId, uint256 startTime, uint256 endTime);
    event AuctionBid(uint256 indexed itemId, address sender, uint256 value, bool extended);
    event AuctionBidWithClientId(uint256 indexed itemId, uint256 value, uint32 indexed clientId);
    event AuctionExtended(uint256 indexed itemId, uint256 endTime);
    event AuctionSettled(uint256 indexed itemId, address winner, uint256 amount);
    event AuctionSettledWithClientId(uint256 indexed itemId, uint32 indexed clientId);

    // Governor contract
    event ProposalCreated(uint256 id, address proposer, uint256 startBlock, uint256 endBlock, string description);
    event ProposalCreatedWithClientId(uint256 indexed id, uint32 indexed clientId);
    event ProposalUpdated(uint256 indexed id, address indexed proposer, string description, string updateMessage);
    event ProposalObjectionPeriodSet(uint256 indexed id, uint256 objectionPeriodEndBlock);
    event ProposalQueued(uint256 id, uint256 eta);
    event ProposalExecuted(uint256 id);
    event ProposalCanceled(uint256 id);
    event ProposalVetoed(uint256 id);
    event VoteCast(address indexed voter, uint256 proposalId, uint8 support, uint256 votes, string reason);
    event VoteCastWithClientId(address indexed voter, uint256 indexed proposalId, uint32 indexed clientId);

    // Data proxy contract
    event ProposalCandidateCreated(address indexed msgSender, string description, string slug);
    event ProposalCandidateUpdated(address indexed msgSender, string description, string slug, string reason);
    event ProposalCandidateCanceled(address indexed msgSender, string slug);
    event SignatureAdded(address indexed signer, bytes sig, uint256 expirationTimestamp, address proposer, string slug, string reason);
    event FeedbackSent(address indexed msgSender, uint256 indexed proposalId, uint8 support, string reason);
    event CandidateFeedbackSent(address indexed msgSender, address indexed proposer, string slug, uint8 support, string reason);

    // Rewards contract
    event ClientRegistered(uint32 indexed clientId, string name, string description);
    event ClientUpdated(uint32 indexed clientId, string name, string description);
    event ClientRewarded(uint32 indexed clientId, uint256 amount);
    event ClientBalanceWithdrawal(uint32 indexed clientId, uint256 amount, address to);

    // Treasury contract
    event ETHDeposited(address indexed sender, uint256 amount);
    event ETHSent(address indexed to, uint256 amount);
}

/// A decoded protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainPayload {
    /// A new item was minted.
    ItemCreated {
        /// Minted item id
        item_id: u64,
        /// Trait seed locked in at mint
        seed: TraitSeed,
    },
    /// An item was burned.
    ItemBurned {
        /// Burned item id
        item_id: u64,
    },
    /// Ownership changed.
    Transfer {
        /// Transferred item id
        item_id: u64,
        /// Previous owner
        from: Address,
        /// New owner
        to: Address,
    },
    /// A holder changed their delegate.
    DelegateChanged {
        /// Token holder
        delegator: Address,
        /// Previous delegate
        from_delegate: Address,
        /// New delegate
        to_delegate: Address,
    },
    /// A delegate's voting power changed.
    DelegateVotesChanged {
        /// Affected delegate
        delegate: Address,
        /// New voting power
        new_votes: i64,
    },
    /// An auction opened.
    AuctionCreated {
        /// Auctioned item id
        item_id: u64,
        /// Start time (unix seconds)
        start_time: i64,
        /// End time (unix seconds)
        end_time: i64,
    },
    /// A bid was placed.
    AuctionBid {
        /// Auctioned item id
        item_id: u64,
        /// Bidder
        bidder: Address,
        /// Bid amount in wei
        amount: U256,
        /// Whether the bid extended the auction
        extended: bool,
    },
    /// Companion event crediting a client for a bid in the same tx.
    AuctionBidClient {
        /// Auctioned item id
        item_id: u64,
        /// Credited client
        client_id: u64,
    },
    /// The auction end time moved forward.
    AuctionExtended {
        /// Auctioned item id
        item_id: u64,
        /// New end time (unix seconds)
        end_time: i64,
    },
    /// The auction settled.
    AuctionSettled {
        /// Settled item id
        item_id: u64,
        /// Winner
        winner: Address,
        /// Winning amount in wei
        amount: U256,
        /// Transaction sender, when the adapter enriched the log
        settler: Option<Address>,
    },
    /// Companion event crediting a client for a settlement in the same tx.
    AuctionSettledClient {
        /// Settled item id
        item_id: u64,
        /// Credited client
        client_id: u64,
    },
    /// A proposal was created.
    ProposalCreated {
        /// Proposal id
        id: u64,
        /// Proposer
        proposer: Address,
        /// Initial description
        description: String,
        /// Voting start block
        start_block: u64,
        /// Voting end block
        end_block: u64,
    },
    /// Companion event crediting a client for a proposal in the same tx.
    ProposalCreatedClient {
        /// Proposal id
        id: u64,
        /// Credited client
        client_id: u64,
    },
    /// A proposal description was updated during the update window.
    ProposalUpdated {
        /// Proposal id
        id: u64,
        /// New description
        description: String,
        /// Proposer's update message
        update_message: String,
    },
    /// A lifecycle transition observed on chain.
    ProposalStatusChanged {
        /// Proposal id
        id: u64,
        /// Incoming status
        status: ProposalStatus,
    },
    /// A vote was cast.
    VoteCast {
        /// Voted proposal
        proposal_id: u64,
        /// Voter
        voter: Address,
        /// Support value
        support: VoteSupport,
        /// Voting weight
        weight: u64,
        /// Optional reason text
        reason: Option<String>,
    },
    /// Companion event crediting a client for a vote in the same tx.
    VoteCastClient {
        /// Voted proposal
        proposal_id: u64,
        /// Credited client
        client_id: u64,
    },
    /// A candidate was created.
    CandidateCreated {
        /// Proposer
        proposer: Address,
        /// Candidate slug
        slug: String,
        /// Initial description
        description: String,
    },
    /// A candidate description was updated.
    CandidateUpdated {
        /// Proposer
        proposer: Address,
        /// Candidate slug
        slug: String,
        /// New description
        description: String,
        /// Proposer's update message
        update_message: String,
    },
    /// A candidate was canceled.
    CandidateCanceled {
        /// Proposer
        proposer: Address,
        /// Candidate slug
        slug: String,
    },
    /// A sponsor signed a candidate.
    SignatureAdded {
        /// Candidate proposer
        proposer: Address,
        /// Candidate slug
        slug: String,
        /// Signer
        signer: Address,
        /// Signature bytes as hex
        sig: String,
        /// Signature expiry (unix seconds)
        expiration_timestamp: i64,
        /// Optional sponsor reason
        reason: Option<String>,
    },
    /// Feedback on a proposal.
    FeedbackSent {
        /// Target proposal
        proposal_id: u64,
        /// Sender
        sender: Address,
        /// Support value
        support: VoteSupport,
        /// Optional reason text
        reason: Option<String>,
    },
    /// Feedback on a candidate.
    CandidateFeedbackSent {
        /// Candidate proposer
        proposer: Address,
        /// Candidate slug
        slug: String,
        /// Sender
        sender: Address,
        /// Support value
        support: VoteSupport,
        /// Optional reason text
        reason: Option<String>,
    },
    /// A reward-program client registered.
    ClientRegistered {
        /// Client id
        client_id: u64,
        /// Display name
        name: String,
        /// Free-form description
        description: String,
    },
    /// A client updated its display metadata.
    ClientUpdated {
        /// Client id
        client_id: u64,
        /// Display name
        name: String,
        /// Free-form description
        description: String,
    },
    /// A client was rewarded.
    ClientRewarded {
        /// Client id
        client_id: u64,
        /// Amount in wei
        amount: U256,
    },
    /// A client withdrew rewards.
    ClientWithdrawal {
        /// Client id
        client_id: u64,
        /// Amount in wei
        amount: U256,
    },
    /// ETH entered the treasury.
    TreasuryDeposit {
        /// Sender
        sender: Address,
        /// Amount in wei
        amount: U256,
    },
    /// ETH left the treasury.
    TreasuryWithdrawal {
        /// Recipient
        recipient: Address,
        /// Amount in wei
        amount: U256,
    },
}

/// A decoded event with its chain coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    /// Chain coordinates of the source log
    pub meta: EventMeta,

    /// Decoded payload
    pub payload: ChainPayload,
}

fn u256_to_u64(value: U256, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow::anyhow!("{} out of u64 range: {}", what, value))
}

fn u256_to_i64(value: U256, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow::anyhow!("{} out of i64 range: {}", what, value))
}

fn non_empty(reason: String) -> Option<String> {
    if reason.is_empty() {
        None
    } else {
        Some(reason)
    }
}

/// Extract the chain coordinates of a raw log.
pub fn meta_from_log(log: &Log, block_timestamp: i64) -> Result<EventMeta> {
    Ok(EventMeta {
        block_number: log.block_number.context("Log missing block_number")?,
        log_index: log.log_index.context("Log missing log_index")?,
        tx_hash: log
            .transaction_hash
            .context("Log missing transaction_hash")?,
        block_timestamp,
    })
}

/// Decode a raw log into a [`ChainPayload`].
///
/// Returns `Ok(None)` for logs with an unrecognized topic (other events
/// the contracts emit that the store has no use for) and an error for
/// recognized topics with malformed data.
pub fn decode_payload(log: &Log) -> Result<Option<ChainPayload>> {
    let Some(topic0) = log.topic0() else {
        return Ok(None);
    };

    let payload = match *topic0 {
        ItemCreated::SIGNATURE_HASH => {
            let ev = ItemCreated::decode_log(log.as_ref(), true)
                .context("Failed to decode ItemCreated")?;
            ChainPayload::ItemCreated {
                item_id: u256_to_u64(ev.itemId, "itemId")?,
                seed: TraitSeed {
                    background: ev.seed.background.to::<u64>(),
                    body: ev.seed.body.to::<u64>(),
                    accessory: ev.seed.accessory.to::<u64>(),
                    head: ev.seed.head.to::<u64>(),
                    glasses: ev.seed.glasses.to::<u64>(),
                },
            }
        }
        ItemBurned::SIGNATURE_HASH => {
            let ev =
                ItemBurned::decode_log(log.as_ref(), true).context("Failed to decode ItemBurned")?;
            ChainPayload::ItemBurned {
                item_id: u256_to_u64(ev.itemId, "itemId")?,
            }
        }
        Transfer::SIGNATURE_HASH => {
            let ev =
                Transfer::decode_log(log.as_ref(), true).context("Failed to decode Transfer")?;
            ChainPayload::Transfer {
                item_id: u256_to_u64(ev.tokenId, "tokenId")?,
                from: ev.from,
                to: ev.to,
            }
        }
        DelegateChanged::SIGNATURE_HASH => {
            let ev = DelegateChanged::decode_log(log.as_ref(), true)
                .context("Failed to decode DelegateChanged")?;
            ChainPayload::DelegateChanged {
                delegator: ev.delegator,
                from_delegate: ev.fromDelegate,
                to_delegate: ev.toDelegate,
            }
        }
        DelegateVotesChanged::SIGNATURE_HASH => {
            let ev = DelegateVotesChanged::decode_log(log.as_ref(), true)
                .context("Failed to decode DelegateVotesChanged")?;
            ChainPayload::DelegateVotesChanged {
                delegate: ev.delegate,
                new_votes: u256_to_i64(ev.newBalance, "newBalance")?,
            }
        }
        AuctionCreated::SIGNATURE_HASH => {
            let ev = AuctionCreated::decode_log(log.as_ref(), true)
                .context("Failed to decode AuctionCreated")?;
            ChainPayload::AuctionCreated {
                item_id: u256_to_u64(ev.itemId, "itemId")?,
                start_time: u256_to_i64(ev.startTime, "startTime")?,
                end_time: u256_to_i64(ev.endTime, "endTime")?,
            }
        }
        AuctionBid::SIGNATURE_HASH => {
            let ev = AuctionBid::decode_log(log.as_ref(), true)
                .context("Failed to decode AuctionBid")?;
            ChainPayload::AuctionBid {
                item_id: u256_to_u64(ev.itemId, "itemId")?,
                bidder: ev.sender,
                amount: ev.value,
                extended: ev.extended,
            }
        }
        AuctionBidWithClientId::SIGNATURE_HASH => {
            let ev = AuctionBidWithClientId::decode_log(log.as_ref(), true)
                .context("Failed to decode AuctionBidWithClientId")?;
            ChainPayload::AuctionBidClient {
                item_id: u256_to_u64(ev.itemId, "itemId")?,
                client_id: ev.clientId as u64,
            }
        }
        AuctionExtended::SIGNATURE_HASH => {
            let ev = AuctionExtended::decode_log(log.as_ref(), true)
                .context("Failed to decode AuctionExtended")?;
            ChainPayload::AuctionExtended {
                item_id: u256_to_u64(ev.itemId, "itemId")?,
                end_time: u256_to_i64(ev.endTime, "endTime")?,
            }
        }
        AuctionSettled::SIGNATURE_HASH => {
            let ev = AuctionSettled::decode_log(log.as_ref(), true)
                .context("Failed to decode AuctionSettled")?;
            ChainPayload::AuctionSettled {
                item_id: u256_to_u64(ev.itemId, "itemId")?,
                winner: ev.winner,
                amount: ev.amount,
                settler: None,
            }
        }
        AuctionSettledWithClientId::SIGNATURE_HASH => {
            let ev = AuctionSettledWithClientId::decode_log(log.as_ref(), true)
                .context("Failed to decode AuctionSettledWithClientId")?;
            ChainPayload::AuctionSettledClient {
                item_id: u256_to_u64(ev.itemId, "itemId")?,
                client_id: ev.clientId as u64,
            }
        }
        ProposalCreated::SIGNATURE_HASH => {
            let ev = ProposalCreated::decode_log(log.as_ref(), true)
                .context("Failed to decode ProposalCreated")?;
            ChainPayload::ProposalCreated {
                id: u256_to_u64(ev.id, "proposal id")?,
                proposer: ev.proposer,
                description: ev.description.clone(),
                start_block: u256_to_u64(ev.startBlock, "startBlock")?,
                end_block: u256_to_u64(ev.endBlock, "endBlock")?,
            }
        }
        ProposalCreatedWithClientId::SIGNATURE_HASH => {
            let ev = ProposalCreatedWithClientId::decode_log(log.as_ref(), true)
                .context("Failed to decode ProposalCreatedWithClientId")?;
            ChainPayload::ProposalCreatedClient {
                id: u256_to_u64(ev.id, "proposal id")?,
                client_id: ev.clientId as u64,
            }
        }
        ProposalUpdated::SIGNATURE_HASH => {
            let ev = ProposalUpdated::decode_log(log.as_ref(), true)
                .context("Failed to decode ProposalUpdated")?;
            ChainPayload::ProposalUpdated {
                id: u256_to_u64(ev.id, "proposal id")?,
                description: ev.description.clone(),
                update_message: ev.updateMessage.clone(),
            }
        }
        ProposalObjectionPeriodSet::SIGNATURE_HASH => {
            let ev = ProposalObjectionPeriodSet::decode_log(log.as_ref(), true)
                .context("Failed to decode ProposalObjectionPeriodSet")?;
            ChainPayload::ProposalStatusChanged {
                id: u256_to_u64(ev.id, "proposal id")?,
                status: ProposalStatus::ObjectionPeriod,
            }
        }
        ProposalQueued::SIGNATURE_HASH => {
            let ev = ProposalQueued::decode_log(log.as_ref(), true)
                .context("Failed to decode ProposalQueued")?;
            ChainPayload::ProposalStatusChanged {
                id: u256_to_u64(ev.id, "proposal id")?,
                status: ProposalStatus::Queued,
            }
        }
        ProposalExecuted::SIGNATURE_HASH => {
            let ev = ProposalExecuted::decode_log(log.as_ref(), true)
                .context("Failed to decode ProposalExecuted")?;
            ChainPayload::ProposalStatusChanged {
                id: u256_to_u64(ev.id, "proposal id")?,
                status: ProposalStatus::Executed,
            }
        }
        ProposalCanceled::SIGNATURE_HASH => {
            let ev = ProposalCanceled::decode_log(log.as_ref(), true)
                .context("Failed to decode ProposalCanceled")?;
            ChainPayload::ProposalStatusChanged {
                id: u256_to_u64(ev.id, "proposal id")?,
                status: ProposalStatus::Cancelled,
            }
        }
        ProposalVetoed::SIGNATURE_HASH => {
            let ev = ProposalVetoed::decode_log(log.as_ref(), true)
                .context("Failed to decode ProposalVetoed")?;
            ChainPayload::ProposalStatusChanged {
                id: u256_to_u64(ev.id, "proposal id")?,
                status: ProposalStatus::Vetoed,
            }
        }
        VoteCast::SIGNATURE_HASH => {
            let ev =
                VoteCast::decode_log(log.as_ref(), true).context("Failed to decode VoteCast")?;
            ChainPayload::VoteCast {
                proposal_id: u256_to_u64(ev.proposalId, "proposalId")?,
                voter: ev.voter,
                support: VoteSupport::from_raw(ev.support)?,
                weight: u256_to_u64(ev.votes, "votes")?,
                reason: non_empty(ev.reason.clone()),
            }
        }
        VoteCastWithClientId::SIGNATURE_HASH => {
            let ev = VoteCastWithClientId::decode_log(log.as_ref(), true)
                .context("Failed to decode VoteCastWithClientId")?;
            ChainPayload::VoteCastClient {
                proposal_id: u256_to_u64(ev.proposalId, "proposalId")?,
                client_id: ev.clientId as u64,
            }
        }
        ProposalCandidateCreated::SIGNATURE_HASH => {
            let ev = ProposalCandidateCreated::decode_log(log.as_ref(), true)
                .context("Failed to decode ProposalCandidateCreated")?;
            ChainPayload::CandidateCreated {
                proposer: ev.msgSender,
                slug: ev.slug.clone(),
                description: ev.description.clone(),
            }
        }
        ProposalCandidateUpdated::SIGNATURE_HASH => {
            let ev = ProposalCandidateUpdated::decode_log(log.as_ref(), true)
                .context("Failed to decode ProposalCandidateUpdated")?;
            ChainPayload::CandidateUpdated {
                proposer: ev.msgSender,
                slug: ev.slug.clone(),
                description: ev.description.clone(),
                update_message: ev.reason.clone(),
            }
        }
        ProposalCandidateCanceled::SIGNATURE_HASH => {
            let ev = ProposalCandidateCanceled::decode_log(log.as_ref(), true)
                .context("Failed to decode ProposalCandidateCanceled")?;
            ChainPayload::CandidateCanceled {
                proposer: ev.msgSender,
                slug: ev.slug.clone(),
            }
        }
        SignatureAdded::SIGNATURE_HASH => {
            let ev = SignatureAdded::decode_log(log.as_ref(), true)
                .context("Failed to decode SignatureAdded")?;
            ChainPayload::SignatureAdded {
                proposer: ev.proposer,
                slug: ev.slug.clone(),
                signer: ev.signer,
                sig: format!("0x{}", hex::encode(&ev.sig)),
                expiration_timestamp: u256_to_i64(ev.expirationTimestamp, "expirationTimestamp")?,
                reason: non_empty(ev.reason.clone()),
            }
        }
        FeedbackSent::SIGNATURE_HASH => {
            let ev = FeedbackSent::decode_log(log.as_ref(), true)
                .context("Failed to decode FeedbackSent")?;
            ChainPayload::FeedbackSent {
                proposal_id: u256_to_u64(ev.proposalId, "proposalId")?,
                sender: ev.msgSender,
                support: VoteSupport::from_raw(ev.support)?,
                reason: non_empty(ev.reason.clone()),
            }
        }
        CandidateFeedbackSent::SIGNATURE_HASH => {
            let ev = CandidateFeedbackSent::decode_log(log.as_ref(), true)
                .context("Failed to decode CandidateFeedbackSent")?;
            ChainPayload::CandidateFeedbackSent {
                proposer: ev.proposer,
                slug: ev.slug.clone(),
                sender: ev.msgSender,
                support: VoteSupport::from_raw(ev.support)?,
                reason: non_empty(ev.reason.clone()),
            }
        }
        ClientRegistered::SIGNATURE_HASH => {
            let ev = ClientRegistered::decode_log(log.as_ref(), true)
                .context("Failed to decode ClientRegistered")?;
            ChainPayload::ClientRegistered {
                client_id: ev.clientId as u64,
                name: ev.name.clone(),
                description: ev.description.clone(),
            }
        }
        ClientUpdated::SIGNATURE_HASH => {
            let ev = ClientUpdated::decode_log(log.as_ref(), true)
                .context("Failed to decode ClientUpdated")?;
            ChainPayload::ClientUpdated {
                client_id: ev.clientId as u64,
                name: ev.name.clone(),
                description: ev.description.clone(),
            }
        }
        ClientRewarded::SIGNATURE_HASH => {
            let ev = ClientRewarded::decode_log(log.as_ref(), true)
                .context("Failed to decode ClientRewarded")?;
            ChainPayload::ClientRewarded {
                client_id: ev.clientId as u64,
                amount: ev.amount,
            }
        }
        ClientBalanceWithdrawal::SIGNATURE_HASH => {
            let ev = ClientBalanceWithdrawal::decode_log(log.as_ref(), true)
                .context("Failed to decode ClientBalanceWithdrawal")?;
            ChainPayload::ClientWithdrawal {
                client_id: ev.clientId as u64,
                amount: ev.amount,
            }
        }
        ETHDeposited::SIGNATURE_HASH => {
            let ev = ETHDeposited::decode_log(log.as_ref(), true)
                .context("Failed to decode ETHDeposited")?;
            ChainPayload::TreasuryDeposit {
                sender: ev.sender,
                amount: ev.amount,
            }
        }
        ETHSent::SIGNATURE_HASH => {
            let ev = ETHSent::decode_log(log.as_ref(), true).context("Failed to decode ETHSent")?;
            ChainPayload::TreasuryWithdrawal {
                recipient: ev.to,
                amount: ev.amount,
            }
        }
        _ => return Ok(None),
    };

    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{B256, LogData};
    use alloy::sol_types::SolValue;

    fn raw_log(address: Address, topics: Vec<B256>, data: Vec<u8>) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address,
                data: LogData::new_unchecked(topics, data.into()),
            },
            block_hash: Some(B256::repeat_byte(0xbb)),
            block_number: Some(1000),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(0xcc)),
            transaction_index: Some(0),
            log_index: Some(4),
            removed: false,
        }
    }

    #[test]
    fn test_decode_auction_bid() {
        let bidder = Address::repeat_byte(0x01);
        let data = (bidder, U256::from(5000u64), true).abi_encode();
        let log = raw_log(
            Address::repeat_byte(0xa0),
            vec![
                AuctionBid::SIGNATURE_HASH,
                B256::from(U256::from(7u64)), // indexed itemId
            ],
            data,
        );

        let payload = decode_payload(&log).unwrap().unwrap();
        assert_eq!(
            payload,
            ChainPayload::AuctionBid {
                item_id: 7,
                bidder,
                amount: U256::from(5000u64),
                extended: true,
            }
        );
    }

    #[test]
    fn test_decode_unknown_topic_is_skipped() {
        let log = raw_log(
            Address::repeat_byte(0xa0),
            vec![B256::repeat_byte(0x99)],
            vec![],
        );
        assert!(decode_payload(&log).unwrap().is_none());
    }

    #[test]
    fn test_decode_malformed_recognized_event_errors() {
        // Right topic, truncated body.
        let log = raw_log(
            Address::repeat_byte(0xa0),
            vec![AuctionBid::SIGNATURE_HASH, B256::from(U256::from(7u64))],
            vec![0u8; 4],
        );
        assert!(decode_payload(&log).is_err());
    }

    #[test]
    fn test_decode_proposal_lifecycle_events() {
        let data = (U256::from(12u64), U256::from(999u64)).abi_encode();
        let log = raw_log(
            Address::repeat_byte(0xb0),
            vec![ProposalQueued::SIGNATURE_HASH],
            data,
        );
        let payload = decode_payload(&log).unwrap().unwrap();
        assert_eq!(
            payload,
            ChainPayload::ProposalStatusChanged {
                id: 12,
                status: ProposalStatus::Queued,
            }
        );
    }

    #[test]
    fn test_meta_from_log() {
        let log = raw_log(
            Address::repeat_byte(0xa0),
            vec![B256::repeat_byte(0x99)],
            vec![],
        );
        let meta = meta_from_log(&log, 1_700_000_000).unwrap();
        assert_eq!(meta.block_number, 1000);
        assert_eq!(meta.log_index, 4);
        assert_eq!(meta.block_timestamp, 1_700_000_000);
    }
}
