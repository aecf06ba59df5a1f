//! Auction and bid storage operations.

use super::{
    decode_address, decode_amount, decode_hash, encode_address, encode_amount, encode_hash,
    AuctionRecord, BidRecord, EventMeta, Storage,
};
use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Insert a newly created auction. Replays are ignored.
    pub async fn insert_auction(&self, auction: &AuctionRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO auctions (item_id, start_time, end_time, settled)
            VALUES (?, ?, ?, 0)
            ON CONFLICT(item_id) DO NOTHING
            "#,
        )
        .bind(auction.item_id as i64)
        .bind(auction.start_time)
        .bind(auction.end_time)
        .execute(&self.pool)
        .await
        .context("Failed to insert auction")?;

        Ok(result.rows_affected() > 0)
    }

    /// Push an auction's end time forward after an extension. End times
    /// only move forward, so an out-of-order replay of an earlier
    /// extension cannot shrink the stored value.
    pub async fn extend_auction(&self, item_id: u64, end_time: i64) -> Result<()> {
        sqlx::query("UPDATE auctions SET end_time = ? WHERE item_id = ? AND end_time < ?")
            .bind(end_time)
            .bind(item_id as i64)
            .bind(end_time)
            .execute(&self.pool)
            .await
            .context("Failed to extend auction")?;

        Ok(())
    }

    /// Append a bid. Replays hit `DO NOTHING`.
    pub async fn insert_bid(&self, bid: &BidRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO bids (
                tx_hash, log_index, item_id, bidder, amount,
                extended, client_id, block_number, block_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(encode_hash(&bid.meta.tx_hash))
        .bind(bid.meta.log_index as i64)
        .bind(bid.item_id as i64)
        .bind(encode_address(&bid.bidder))
        .bind(encode_amount(&bid.amount))
        .bind(bid.extended as i64)
        .bind(bid.client_id.map(|v| v as i64))
        .bind(bid.meta.block_number as i64)
        .bind(bid.meta.block_timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to insert bid")?;

        Ok(result.rows_affected() > 0)
    }

    /// Credit a reward-program client for the bid emitted in the same
    /// transaction. Idempotent overwrite.
    pub async fn set_bid_client_id(
        &self,
        meta: &EventMeta,
        item_id: u64,
        client_id: u64,
    ) -> Result<()> {
        sqlx::query("UPDATE bids SET client_id = ? WHERE tx_hash = ? AND item_id = ?")
            .bind(client_id as i64)
            .bind(encode_hash(&meta.tx_hash))
            .bind(item_id as i64)
            .execute(&self.pool)
            .await
            .context("Failed to set bid client id")?;

        Ok(())
    }

    /// Credit a reward-program client for an auction's winning bid.
    pub async fn set_auction_client_id(&self, item_id: u64, client_id: u64) -> Result<()> {
        sqlx::query("UPDATE auctions SET client_id = ? WHERE item_id = ?")
            .bind(client_id as i64)
            .bind(item_id as i64)
            .execute(&self.pool)
            .await
            .context("Failed to set auction client id")?;

        Ok(())
    }

    /// Settle an auction: record winner and amount, and link the winning
    /// bid onto the item row.
    ///
    /// The winning bid is the latest stored bid on the item with a value
    /// equal to the settled amount. All writes happen in one transaction.
    pub async fn settle_auction(
        &self,
        item_id: u64,
        winner: &Address,
        amount: &U256,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin settle transaction")?;

        sqlx::query(
            r#"
            UPDATE auctions
            SET winner_address = ?, amount = ?, settled = 1
            WHERE item_id = ?
            "#,
        )
        .bind(encode_address(winner))
        .bind(encode_amount(amount))
        .bind(item_id as i64)
        .execute(&mut *tx)
        .await
        .context("Failed to settle auction")?;

        let winning_bid: Option<(String, i64)> = sqlx::query_as(
            r#"
            SELECT tx_hash, log_index FROM bids
            WHERE item_id = ? AND amount = ?
            ORDER BY block_number DESC, log_index DESC
            LIMIT 1
            "#,
        )
        .bind(item_id as i64)
        .bind(encode_amount(amount))
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to look up winning bid")?;

        let winning_bid_id = winning_bid.map(|(tx_hash, log_index)| format!("{}:{}", tx_hash, log_index));

        sqlx::query("UPDATE items SET winner_address = ?, winning_bid_id = ? WHERE id = ?")
            .bind(encode_address(winner))
            .bind(winning_bid_id.as_deref())
            .bind(item_id as i64)
            .execute(&mut *tx)
            .await
            .context("Failed to link winning bid onto item")?;

        tx.commit()
            .await
            .context("Failed to commit settle transaction")?;

        Ok(())
    }

    /// Fetch a single auction.
    pub async fn get_auction(&self, item_id: u64) -> Result<Option<AuctionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT item_id, start_time, end_time, winner_address,
                   amount, settled, client_id
            FROM auctions
            WHERE item_id = ?
            "#,
        )
        .bind(item_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let winner: Option<String> = row.get("winner_address");
            let amount: Option<String> = row.get("amount");
            Ok(AuctionRecord {
                item_id: row.get::<i64, _>("item_id") as u64,
                start_time: row.get("start_time"),
                end_time: row.get("end_time"),
                winner: winner.as_deref().map(decode_address).transpose()?,
                amount: amount.as_deref().map(decode_amount).transpose()?,
                settled: row.get::<i64, _>("settled") != 0,
                client_id: row.get::<Option<i64>, _>("client_id").map(|v| v as u64),
            })
        })
        .transpose()
    }

    /// All bids on an item, in chain order.
    pub async fn get_bids(&self, item_id: u64) -> Result<Vec<BidRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tx_hash, log_index, item_id, bidder, amount,
                   extended, client_id, block_number, block_timestamp
            FROM bids
            WHERE item_id = ?
            ORDER BY block_number, log_index
            "#,
        )
        .bind(item_id as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let tx_hash: String = row.get("tx_hash");
                let bidder: String = row.get("bidder");
                let amount: String = row.get("amount");
                Ok(BidRecord {
                    meta: EventMeta {
                        block_number: row.get::<i64, _>("block_number") as u64,
                        log_index: row.get::<i64, _>("log_index") as u64,
                        tx_hash: decode_hash(&tx_hash)?,
                        block_timestamp: row.get("block_timestamp"),
                    },
                    item_id: row.get::<i64, _>("item_id") as u64,
                    bidder: decode_address(&bidder)?,
                    amount: decode_amount(&amount)?,
                    extended: row.get::<i64, _>("extended") != 0,
                    client_id: row.get::<Option<i64>, _>("client_id").map(|v| v as u64),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_storage;
    use super::*;
    use alloy::primitives::B256;

    fn bid(item_id: u64, block: u64, log_index: u64, tx_byte: u8, amount: u64) -> BidRecord {
        BidRecord {
            meta: EventMeta {
                block_number: block,
                log_index,
                tx_hash: B256::repeat_byte(tx_byte),
                block_timestamp: 1_700_000_000 + block as i64,
            },
            item_id,
            bidder: Address::repeat_byte(tx_byte),
            amount: U256::from(amount),
            extended: false,
            client_id: None,
        }
    }

    #[tokio::test]
    async fn test_bid_replay_is_ignored() {
        let (storage, _temp_db) = setup_storage().await;

        let b = bid(7, 100, 1, 0x01, 1000);
        assert!(storage.insert_bid(&b).await.unwrap());
        assert!(!storage.insert_bid(&b).await.unwrap());

        let bids = storage.get_bids(7).await.unwrap();
        assert_eq!(bids.len(), 1);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_settle_links_winning_bid_by_value() {
        let (storage, _temp_db) = setup_storage().await;

        storage
            .insert_item(&super::super::ItemRecord {
                id: 7,
                seed: gavel_core::types::TraitSeed {
                    background: 0,
                    body: 0,
                    accessory: 0,
                    head: 0,
                    glasses: 0,
                },
                owner: None,
                burned: false,
                settled_by: None,
                settled_at: None,
                winning_bid_id: None,
                winner: None,
                created_at_block: 90,
                created_at_timestamp: 1,
            })
            .await
            .unwrap();

        storage
            .insert_auction(&AuctionRecord {
                item_id: 7,
                start_time: 0,
                end_time: 100,
                winner: None,
                amount: None,
                settled: false,
                client_id: None,
            })
            .await
            .unwrap();

        storage.insert_bid(&bid(7, 100, 1, 0x01, 500)).await.unwrap();
        storage.insert_bid(&bid(7, 101, 2, 0x02, 900)).await.unwrap();

        let winner = Address::repeat_byte(0x02);
        storage
            .settle_auction(7, &winner, &U256::from(900))
            .await
            .unwrap();

        let auction = storage.get_auction(7).await.unwrap().unwrap();
        assert!(auction.settled);
        assert_eq!(auction.winner, Some(winner));
        assert_eq!(auction.amount, Some(U256::from(900)));

        let item = storage.get_item(7).await.unwrap().unwrap();
        assert_eq!(item.winner, Some(winner));
        let expected_bid_id = format!("{:#x}:2", B256::repeat_byte(0x02));
        assert_eq!(item.winning_bid_id, Some(expected_bid_id));

        storage.close().await;
    }

    #[tokio::test]
    async fn test_extension_replay_cannot_shrink_end_time() {
        let (storage, _temp_db) = setup_storage().await;

        storage
            .insert_auction(&AuctionRecord {
                item_id: 9,
                start_time: 0,
                end_time: 2000,
                winner: None,
                amount: None,
                settled: false,
                client_id: None,
            })
            .await
            .unwrap();

        storage.extend_auction(9, 2500).await.unwrap();
        // An earlier extension arriving late is a no-op.
        storage.extend_auction(9, 2200).await.unwrap();

        let auction = storage.get_auction(9).await.unwrap().unwrap();
        assert_eq!(auction.end_time, 2500);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_client_id_attribution_updates() {
        let (storage, _temp_db) = setup_storage().await;

        let b = bid(3, 50, 4, 0x0a, 700);
        storage.insert_bid(&b).await.unwrap();

        storage.set_bid_client_id(&b.meta, 3, 12).await.unwrap();
        // Replaying the companion event is a no-op overwrite.
        storage.set_bid_client_id(&b.meta, 3, 12).await.unwrap();

        let bids = storage.get_bids(3).await.unwrap();
        assert_eq!(bids[0].client_id, Some(12));

        storage.close().await;
    }
}
