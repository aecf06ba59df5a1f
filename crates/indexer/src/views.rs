//! Read-side projections over the materialized store.
//!
//! Everything here is a plain query; no view writes anything. Display
//! names come from the persistent name cache and may be null when an
//! address has never been resolved.

use alloy::primitives::Address;
use anyhow::Result;
use gavel_core::types::{ProposalStatus, TraitSeed};
use sqlx::Row;

use crate::storage::{
    decode_address, encode_address, ProposalRecord, Storage, VoterRecord,
};

/// A voter row joined with its cached display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedVoter {
    /// The voter aggregates.
    pub voter: VoterRecord,

    /// Cached display name, when resolved.
    pub display_name: Option<String>,
}

/// One settled or running auction with its bid count and the auctioned
/// item's traits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionSummary {
    /// Auctioned item.
    pub item_id: u64,

    /// Trait seed of the auctioned item, when the item row exists.
    pub traits: Option<TraitSeed>,

    /// Auction end time (unix seconds).
    pub end_time: i64,

    /// Winner, once settled.
    pub winner: Option<Address>,

    /// Winner's cached display name, when resolved.
    pub winner_name: Option<String>,

    /// Winning amount as stored decimal wei, once settled.
    pub amount: Option<String>,

    /// Whether the auction has settled.
    pub settled: bool,

    /// Number of bids observed.
    pub bid_count: u64,
}

/// Activity counts for one account across the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountActivity {
    /// Items currently owned.
    pub owned_item_ids: Vec<u64>,

    /// Bids placed.
    pub bid_count: u64,

    /// Votes cast.
    pub vote_count: u64,

    /// Proposals created.
    pub proposal_count: u64,

    /// Feedback entries sent.
    pub feedback_count: u64,

    /// Auctions settled by this account.
    pub settlement_count: u64,
}

impl Storage {
    /// Proposals still moving through the lifecycle, oldest first.
    pub async fn active_proposals(&self) -> Result<Vec<ProposalRecord>> {
        let statuses: Vec<String> = ProposalStatus::ACTIVE_SET
            .iter()
            .map(|s| s.to_string())
            .collect();

        // Bind each status individually; sqlx has no array expansion for SQLite.
        let rows = sqlx::query(
            r#"
            SELECT id, proposer, description, status,
                   created_at_block, created_at_timestamp, start_block, end_block,
                   for_votes, against_votes, abstain_votes,
                   queued_at, executed_at, vetoed_at, cancelled_at, client_id
            FROM proposals
            WHERE status IN (?, ?, ?, ?)
            ORDER BY id
            "#,
        )
        .bind(&statuses[0])
        .bind(&statuses[1])
        .bind(&statuses[2])
        .bind(&statuses[3])
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(Self::row_to_proposal_record).collect()
    }

    /// Voters by current delegated voting power, strongest first.
    pub async fn ranked_voters(&self, limit: u32) -> Result<Vec<RankedVoter>> {
        let rows = sqlx::query(
            r#"
            SELECT v.address, v.delegated_votes, v.total_votes, v.represented_item_ids,
                   n.name AS display_name
            FROM voters v
            LEFT JOIN name_cache n ON n.address = v.address
            WHERE v.delegated_votes > 0
            ORDER BY v.delegated_votes DESC, v.address
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                let display_name: Option<String> = row.get("display_name");
                Ok(RankedVoter {
                    voter: Self::row_to_voter_record(row)?,
                    display_name,
                })
            })
            .collect()
    }

    /// Recent auctions with bid counts, newest first.
    pub async fn auction_history(&self, limit: u32) -> Result<Vec<AuctionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT a.item_id, a.end_time, a.winner_address, a.amount, a.settled,
                   n.name AS winner_name,
                   i.background, i.body, i.accessory, i.head, i.glasses,
                   (SELECT COUNT(*) FROM bids b WHERE b.item_id = a.item_id) AS bid_count
            FROM auctions a
            LEFT JOIN items i ON i.id = a.item_id
            LEFT JOIN name_cache n ON n.address = a.winner_address
            ORDER BY a.item_id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                let winner: Option<String> = row.get("winner_address");
                let traits = row
                    .get::<Option<i64>, _>("background")
                    .map(|background| TraitSeed {
                        background: background as u64,
                        body: row.get::<i64, _>("body") as u64,
                        accessory: row.get::<i64, _>("accessory") as u64,
                        head: row.get::<i64, _>("head") as u64,
                        glasses: row.get::<i64, _>("glasses") as u64,
                    });
                Ok(AuctionSummary {
                    item_id: row.get::<i64, _>("item_id") as u64,
                    traits,
                    end_time: row.get("end_time"),
                    winner: winner.as_deref().map(decode_address).transpose()?,
                    winner_name: row.get("winner_name"),
                    amount: row.get("amount"),
                    settled: row.get::<i64, _>("settled") != 0,
                    bid_count: row.get::<i64, _>("bid_count") as u64,
                })
            })
            .collect()
    }

    /// Everything one account has done across the protocol.
    pub async fn account_activity(&self, address: &Address) -> Result<AccountActivity> {
        let text = encode_address(address);

        let owned: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM items WHERE owner_address = ? AND burned = 0 ORDER BY id",
        )
        .bind(&text)
        .fetch_all(self.pool())
        .await?;

        let bid_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bids WHERE bidder = ?")
            .bind(&text)
            .fetch_one(self.pool())
            .await?;

        let vote_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE voter = ?")
            .bind(&text)
            .fetch_one(self.pool())
            .await?;

        let proposal_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM proposals WHERE proposer = ?")
                .bind(&text)
                .fetch_one(self.pool())
                .await?;

        let feedback_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM feedback WHERE sender = ?")
                .bind(&text)
                .fetch_one(self.pool())
                .await?;

        let settlement_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM settlements WHERE settler_address = ?")
                .bind(&text)
                .fetch_one(self.pool())
                .await?;

        Ok(AccountActivity {
            owned_item_ids: owned.into_iter().map(|v| v as u64).collect(),
            bid_count: bid_count as u64,
            vote_count: vote_count as u64,
            proposal_count: proposal_count as u64,
            feedback_count: feedback_count as u64,
            settlement_count: settlement_count as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::setup_storage;
    use crate::storage::{
        AuctionRecord, BidRecord, EventMeta, ItemRecord, NameRecord, ProposalRecord,
    };
    use alloy::primitives::{B256, U256};

    fn meta(block_number: u64, log_index: u64, tx_byte: u8) -> EventMeta {
        EventMeta {
            block_number,
            log_index,
            tx_hash: B256::repeat_byte(tx_byte),
            block_timestamp: 1_700_000_000,
        }
    }

    fn proposal(id: u64, proposer: Address) -> ProposalRecord {
        ProposalRecord {
            id,
            proposer,
            description: format!("Proposal {}", id),
            status: ProposalStatus::Pending,
            created_at_block: 100,
            created_at_timestamp: 1_700_000_000,
            start_block: 110,
            end_block: 200,
            for_votes: 0,
            against_votes: 0,
            abstain_votes: 0,
            queued_at: None,
            executed_at: None,
            vetoed_at: None,
            cancelled_at: None,
            client_id: None,
        }
    }

    #[tokio::test]
    async fn test_active_proposals_excludes_terminal() {
        let (storage, _temp_db) = setup_storage().await;

        let proposer = Address::repeat_byte(0x81);
        for id in 1..=3u64 {
            storage.insert_proposal(&proposal(id, proposer)).await.unwrap();
        }
        storage
            .apply_proposal_status(2, ProposalStatus::Cancelled, 1_700_000_100)
            .await
            .unwrap();
        storage
            .apply_proposal_status(3, ProposalStatus::Active, 1_700_000_100)
            .await
            .unwrap();

        let active = storage.active_proposals().await.unwrap();
        let ids: Vec<u64> = active.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 3]);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_ranked_voters_order_and_names() {
        let (storage, _temp_db) = setup_storage().await;

        let whale = Address::repeat_byte(0x82);
        let minnow = Address::repeat_byte(0x83);
        storage.set_delegated_votes(&whale, 40).await.unwrap();
        storage.set_delegated_votes(&minnow, 2).await.unwrap();
        storage
            .upsert_cached_name(&NameRecord {
                address: whale,
                name: Some("whale.eth".to_string()),
                avatar: None,
                resolved_at: 1_700_000_000,
            })
            .await
            .unwrap();

        let ranked = storage.ranked_voters(10).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].voter.address, whale);
        assert_eq!(ranked[0].display_name.as_deref(), Some("whale.eth"));
        assert_eq!(ranked[1].voter.address, minnow);
        assert_eq!(ranked[1].display_name, None);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_auction_history_counts_bids() {
        let (storage, _temp_db) = setup_storage().await;

        let bidder = Address::repeat_byte(0x84);
        storage
            .insert_item(&ItemRecord {
                id: 21,
                seed: TraitSeed {
                    background: 1,
                    body: 2,
                    accessory: 3,
                    head: 4,
                    glasses: 5,
                },
                owner: None,
                burned: false,
                settled_by: None,
                settled_at: None,
                winning_bid_id: None,
                winner: None,
                created_at_block: 290,
                created_at_timestamp: 1_700_000_000,
            })
            .await
            .unwrap();
        storage
            .insert_auction(&AuctionRecord {
                item_id: 21,
                start_time: 1000,
                end_time: 2000,
                winner: None,
                amount: None,
                settled: false,
                client_id: None,
            })
            .await
            .unwrap();
        for log_index in 0..3u64 {
            storage
                .insert_bid(&BidRecord {
                    meta: meta(300, log_index, 0x10),
                    item_id: 21,
                    bidder,
                    amount: U256::from(100 + log_index),
                    extended: false,
                    client_id: None,
                })
                .await
                .unwrap();
        }
        storage
            .settle_auction(21, &bidder, &U256::from(102))
            .await
            .unwrap();

        let history = storage.auction_history(5).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].item_id, 21);
        assert_eq!(history[0].bid_count, 3);
        assert!(history[0].settled);
        assert_eq!(history[0].winner, Some(bidder));
        assert_eq!(history[0].amount.as_deref(), Some("102"));
        assert_eq!(
            history[0].traits,
            Some(TraitSeed {
                background: 1,
                body: 2,
                accessory: 3,
                head: 4,
                glasses: 5,
            })
        );

        storage.close().await;
    }

    #[tokio::test]
    async fn test_account_activity_counts() {
        let (storage, _temp_db) = setup_storage().await;

        let account = Address::repeat_byte(0x85);
        storage.insert_proposal(&proposal(9, account)).await.unwrap();
        storage
            .insert_auction(&AuctionRecord {
                item_id: 30,
                start_time: 1000,
                end_time: 2000,
                winner: None,
                amount: None,
                settled: false,
                client_id: None,
            })
            .await
            .unwrap();
        storage
            .insert_bid(&BidRecord {
                meta: meta(310, 0, 0x11),
                item_id: 30,
                bidder: account,
                amount: U256::from(700),
                extended: false,
                client_id: None,
            })
            .await
            .unwrap();

        let activity = storage.account_activity(&account).await.unwrap();
        assert_eq!(activity.bid_count, 1);
        assert_eq!(activity.proposal_count, 1);
        assert_eq!(activity.vote_count, 0);
        assert!(activity.owned_item_ids.is_empty());

        storage.close().await;
    }
}
