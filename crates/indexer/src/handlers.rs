//! Event dispatch: routes decoded chain events onto storage operations.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use tracing::{debug, warn};

use gavel_core::attribution::settled_id;
use gavel_core::types::ProposalStatus;

use crate::listener::{ChainEvent, ChainPayload};
use crate::rewards::{OnchainRewardsOracle, RewardsOracle};
use crate::storage::{
    candidate_key, AuctionRecord, BidRecord, CandidateRecord, CandidateVersionRecord,
    ClientRecord, DelegationRecord, EventMeta, FeedbackRecord, FlowDirection, ItemRecord,
    ProposalRecord, ProposalVersionRecord, RewardEventRecord, RewardKind, SettlementRecord,
    Storage, TransferRecord, TreasuryRecord, VoteRecord,
};

/// Applies decoded events to the store, one at a time, in chain order.
///
/// Every handler is idempotent: replaying a block range leaves the
/// database in the same state it was in after the first pass.
///
/// When an oracle is attached, reward and client-metadata events also
/// trigger an authoritative on-chain read that overwrites the stored
/// totals; local arithmetic never feeds those columns.
pub struct Dispatcher<O = OnchainRewardsOracle> {
    storage: Storage,
    oracle: Option<O>,
}

impl Dispatcher<OnchainRewardsOracle> {
    /// Create a dispatcher over the given store, without an oracle.
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            oracle: None,
        }
    }
}

impl<O: RewardsOracle> Dispatcher<O> {
    /// Create a dispatcher that reconciles client totals through the
    /// given oracle on every reward event.
    pub fn with_oracle(storage: Storage, oracle: O) -> Self {
        Self {
            storage,
            oracle: Some(oracle),
        }
    }

    /// Apply a single event.
    pub async fn apply(&self, event: &ChainEvent) -> Result<()> {
        let meta = event.meta;

        match &event.payload {
            ChainPayload::ItemCreated { item_id, seed } => {
                self.storage
                    .insert_item(&ItemRecord {
                        id: *item_id,
                        seed: *seed,
                        owner: None,
                        burned: false,
                        settled_by: None,
                        settled_at: None,
                        winning_bid_id: None,
                        winner: None,
                        created_at_block: meta.block_number,
                        created_at_timestamp: meta.block_timestamp,
                    })
                    .await?;
            }

            ChainPayload::ItemBurned { item_id } => {
                self.storage.mark_item_burned(*item_id).await?;
            }

            ChainPayload::Transfer { item_id, from, to } => {
                self.storage
                    .insert_transfer(&TransferRecord {
                        meta,
                        item_id: *item_id,
                        from: *from,
                        to: *to,
                    })
                    .await?;

                if *to != Address::ZERO {
                    self.storage.set_item_owner(*item_id, to).await?;
                }

                // Ownership moved, so both sides' delegates may now
                // represent a different item set.
                self.recompute_for_holder(from).await?;
                self.recompute_for_holder(to).await?;
            }

            ChainPayload::DelegateChanged {
                delegator,
                from_delegate,
                to_delegate,
            } => {
                self.storage
                    .insert_delegation(&DelegationRecord {
                        meta,
                        delegator: *delegator,
                        from_delegate: *from_delegate,
                        to_delegate: *to_delegate,
                    })
                    .await?;

                if *from_delegate != Address::ZERO {
                    self.storage.recompute_voter(from_delegate).await?;
                }
                if *to_delegate != Address::ZERO {
                    self.storage.recompute_voter(to_delegate).await?;
                }
            }

            ChainPayload::DelegateVotesChanged {
                delegate,
                new_votes,
            } => {
                self.storage.set_delegated_votes(delegate, *new_votes).await?;
            }

            ChainPayload::AuctionCreated {
                item_id,
                start_time,
                end_time,
            } => {
                self.storage
                    .insert_auction(&AuctionRecord {
                        item_id: *item_id,
                        start_time: *start_time,
                        end_time: *end_time,
                        winner: None,
                        amount: None,
                        settled: false,
                        client_id: None,
                    })
                    .await?;
            }

            ChainPayload::AuctionBid {
                item_id,
                bidder,
                amount,
                extended,
            } => {
                self.storage
                    .insert_bid(&BidRecord {
                        meta,
                        item_id: *item_id,
                        bidder: *bidder,
                        amount: *amount,
                        extended: *extended,
                        client_id: None,
                    })
                    .await?;
            }

            ChainPayload::AuctionBidClient { item_id, client_id } => {
                self.storage
                    .set_bid_client_id(&meta, *item_id, *client_id)
                    .await?;
            }

            ChainPayload::AuctionExtended { item_id, end_time } => {
                self.storage.extend_auction(*item_id, *end_time).await?;
            }

            ChainPayload::AuctionSettled {
                item_id,
                winner,
                amount,
                settler,
            } => {
                self.storage
                    .insert_settlement(&SettlementRecord {
                        item_id: *item_id,
                        meta,
                        settler: *settler,
                    })
                    .await?;

                self.storage.settle_auction(*item_id, winner, amount).await?;

                // This settlement tx also minted the next item(s); credit
                // the settler to them now when the sender is known. Items
                // minted later replay through the resolver's backfill.
                if let Some(settler) = settler {
                    self.attribute_minted_items(*item_id, settler, meta.block_timestamp)
                        .await?;
                }
            }

            ChainPayload::AuctionSettledClient { item_id, client_id } => {
                self.storage
                    .set_auction_client_id(*item_id, *client_id)
                    .await?;
            }

            ChainPayload::ProposalCreated {
                id,
                proposer,
                description,
                start_block,
                end_block,
            } => {
                let inserted = self
                    .storage
                    .insert_proposal(&ProposalRecord {
                        id: *id,
                        proposer: *proposer,
                        description: description.clone(),
                        status: ProposalStatus::Pending,
                        created_at_block: meta.block_number,
                        created_at_timestamp: meta.block_timestamp,
                        start_block: *start_block,
                        end_block: *end_block,
                        for_votes: 0,
                        against_votes: 0,
                        abstain_votes: 0,
                        queued_at: None,
                        executed_at: None,
                        vetoed_at: None,
                        cancelled_at: None,
                        client_id: None,
                    })
                    .await?;

                if inserted {
                    self.storage
                        .insert_proposal_version(&ProposalVersionRecord {
                            meta,
                            proposal_id: *id,
                            description: description.clone(),
                            update_message: String::new(),
                            created_at: meta.block_timestamp,
                            version_number: 0,
                        })
                        .await?;
                }
            }

            ChainPayload::ProposalCreatedClient { id, client_id } => {
                self.storage.set_proposal_client_id(*id, *client_id).await?;
            }

            ChainPayload::ProposalUpdated {
                id,
                description,
                update_message,
            } => {
                self.storage
                    .update_proposal_description(*id, description)
                    .await?;
                self.storage
                    .insert_proposal_version(&ProposalVersionRecord {
                        meta,
                        proposal_id: *id,
                        description: description.clone(),
                        update_message: update_message.clone(),
                        created_at: meta.block_timestamp,
                        version_number: 0,
                    })
                    .await?;
            }

            ChainPayload::ProposalStatusChanged { id, status } => {
                let merged = self
                    .storage
                    .apply_proposal_status(*id, *status, meta.block_timestamp)
                    .await?;
                if merged != *status {
                    debug!(
                        "Proposal {} kept status {:?}; incoming {:?} did not advance it",
                        id, merged, status
                    );
                }
            }

            ChainPayload::VoteCast {
                proposal_id,
                voter,
                support,
                weight,
                reason,
            } => {
                self.storage
                    .insert_vote(&VoteRecord {
                        meta,
                        proposal_id: *proposal_id,
                        voter: *voter,
                        support: *support,
                        weight: *weight,
                        reason: reason.clone(),
                        client_id: None,
                    })
                    .await?;

                self.storage.recompute_voter(voter).await?;
            }

            ChainPayload::VoteCastClient {
                proposal_id,
                client_id,
            } => {
                self.storage
                    .set_vote_client_id(&meta, *proposal_id, *client_id)
                    .await?;
            }

            ChainPayload::CandidateCreated {
                proposer,
                slug,
                description,
            } => {
                let id = candidate_key(proposer, slug);
                let inserted = self
                    .storage
                    .insert_candidate(&CandidateRecord {
                        id: id.clone(),
                        proposer: *proposer,
                        slug: slug.clone(),
                        description: description.clone(),
                        created_at: meta.block_timestamp,
                        canceled: false,
                        latest_update_at: None,
                        signature_count: 0,
                    })
                    .await?;

                if inserted {
                    self.storage
                        .insert_candidate_version(&CandidateVersionRecord {
                            meta,
                            candidate_id: id,
                            description: description.clone(),
                            update_message: String::new(),
                            created_at: meta.block_timestamp,
                            version_number: 0,
                        })
                        .await?;
                }
            }

            ChainPayload::CandidateUpdated {
                proposer,
                slug,
                description,
                update_message,
            } => {
                let id = candidate_key(proposer, slug);
                self.storage
                    .update_candidate(&id, description, meta.block_timestamp)
                    .await?;
                self.storage
                    .insert_candidate_version(&CandidateVersionRecord {
                        meta,
                        candidate_id: id,
                        description: description.clone(),
                        update_message: update_message.clone(),
                        created_at: meta.block_timestamp,
                        version_number: 0,
                    })
                    .await?;
            }

            ChainPayload::CandidateCanceled { proposer, slug } => {
                let id = candidate_key(proposer, slug);
                self.storage.cancel_candidate(&id).await?;
            }

            ChainPayload::SignatureAdded {
                proposer,
                slug,
                signer,
                sig,
                expiration_timestamp,
                reason,
            } => {
                let id = candidate_key(proposer, slug);
                self.storage
                    .insert_candidate_signature(&crate::storage::SignatureRecord {
                        meta,
                        candidate_id: id,
                        signer: *signer,
                        sig: sig.clone(),
                        expiration_timestamp: *expiration_timestamp,
                        reason: reason.clone(),
                    })
                    .await?;
            }

            ChainPayload::FeedbackSent {
                proposal_id,
                sender,
                support,
                reason,
            } => {
                self.storage
                    .insert_feedback(&FeedbackRecord {
                        meta,
                        proposal_id: Some(*proposal_id),
                        candidate_id: None,
                        sender: *sender,
                        support: *support,
                        reason: reason.clone(),
                    })
                    .await?;
            }

            ChainPayload::CandidateFeedbackSent {
                proposer,
                slug,
                sender,
                support,
                reason,
            } => {
                self.storage
                    .insert_feedback(&FeedbackRecord {
                        meta,
                        proposal_id: None,
                        candidate_id: Some(candidate_key(proposer, slug)),
                        sender: *sender,
                        support: *support,
                        reason: reason.clone(),
                    })
                    .await?;
            }

            ChainPayload::ClientRegistered {
                client_id,
                name,
                description,
            } => {
                self.storage
                    .insert_client(&ClientRecord {
                        id: *client_id,
                        name: name.clone(),
                        description: description.clone(),
                        badge_uri: None,
                        total_rewarded: alloy::primitives::U256::ZERO,
                        total_withdrawn: alloy::primitives::U256::ZERO,
                        registered_at_block: meta.block_number,
                    })
                    .await?;

                self.refresh_badge(*client_id).await;
            }

            ChainPayload::ClientUpdated {
                client_id,
                name,
                description,
            } => {
                self.storage
                    .update_client_metadata(*client_id, name, description)
                    .await?;

                // Metadata-changing events are the only trigger for a
                // badge re-fetch.
                self.refresh_badge(*client_id).await;
            }

            ChainPayload::ClientRewarded { client_id, amount } => {
                self.storage
                    .insert_reward_event(&RewardEventRecord {
                        meta,
                        client_id: *client_id,
                        kind: RewardKind::Reward,
                        amount: *amount,
                    })
                    .await?;

                self.refresh_totals(*client_id).await?;
            }

            ChainPayload::ClientWithdrawal { client_id, amount } => {
                self.storage
                    .insert_reward_event(&RewardEventRecord {
                        meta,
                        client_id: *client_id,
                        kind: RewardKind::Withdrawal,
                        amount: *amount,
                    })
                    .await?;

                self.refresh_totals(*client_id).await?;
            }

            ChainPayload::TreasuryDeposit { sender, amount } => {
                self.storage
                    .insert_treasury_transaction(&TreasuryRecord {
                        meta,
                        direction: FlowDirection::In,
                        counterparty: *sender,
                        amount: *amount,
                    })
                    .await?;
            }

            ChainPayload::TreasuryWithdrawal { recipient, amount } => {
                self.storage
                    .insert_treasury_transaction(&TreasuryRecord {
                        meta,
                        direction: FlowDirection::Out,
                        counterparty: *recipient,
                        amount: *amount,
                    })
                    .await?;
            }
        }

        Ok(())
    }

    /// Overwrite a client's totals from an authoritative on-chain read.
    ///
    /// A failed read keeps the prior stored values; the periodic rewards
    /// service retries it on its next pass.
    async fn refresh_totals(&self, client_id: u64) -> Result<()> {
        let Some(oracle) = &self.oracle else {
            return Ok(());
        };

        match oracle.totals(client_id).await {
            Ok(totals) => {
                self.storage
                    .overwrite_client_totals(
                        client_id,
                        &totals.total_rewarded,
                        &totals.total_withdrawn(),
                    )
                    .await
            }
            Err(e) => {
                warn!("Keeping stored totals for client {}: {}", client_id, e);
                Ok(())
            }
        }
    }

    /// Fetch and cache a client's badge URI, best effort.
    async fn refresh_badge(&self, client_id: u64) {
        let Some(oracle) = &self.oracle else {
            return;
        };

        match oracle.badge(client_id).await {
            Ok(badge) => {
                if let Err(e) = self
                    .storage
                    .set_client_badge(client_id, badge.as_deref())
                    .await
                {
                    warn!("Failed to store badge for client {}: {}", client_id, e);
                }
            }
            Err(e) => warn!("Keeping stored badge for client {}: {}", client_id, e),
        }
    }

    /// Recompute aggregates for the delegate of a token holder.
    async fn recompute_for_holder(&self, holder: &Address) -> Result<()> {
        if *holder == Address::ZERO {
            return Ok(());
        }

        let delegate = self
            .storage
            .current_delegate(holder)
            .await
            .with_context(|| format!("Failed to resolve delegate of {:#x}", holder))?;

        self.storage.recompute_voter(&delegate).await
    }

    /// Attribute the items minted by the settlement of `auction_id`.
    ///
    /// The settling transaction of auction N mints the item(s) that map
    /// back to N. The write is a no-op for rows already attributed and
    /// for items not yet inserted; the settlement resolver backfills the
    /// latter from the stored settlement log.
    async fn attribute_minted_items(
        &self,
        auction_id: u64,
        settler: &Address,
        settled_at: i64,
    ) -> Result<()> {
        for candidate in auction_id + 1..=auction_id + 2 {
            if settled_id(candidate) != Some(auction_id) {
                continue;
            }
            match self
                .storage
                .attribute_item(candidate, settler, settled_at)
                .await
            {
                Ok(true) => debug!("Attributed item {} to {:#x}", candidate, settler),
                Ok(false) => {}
                Err(e) => warn!("Failed to attribute item {}: {}", candidate, e),
            }
        }
        Ok(())
    }
}
