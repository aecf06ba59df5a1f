//! Item and settlement storage operations.

use super::{
    decode_address, decode_hash, encode_address, encode_hash, EventMeta, ItemRecord,
    SettlementRecord, Storage,
};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use gavel_core::types::TraitSeed;
use sqlx::Row;

impl Storage {
    /// Insert a freshly minted item.
    ///
    /// Trait indices are immutable: replays hit `DO NOTHING` and leave the
    /// stored row untouched. Returns `true` if the row was inserted.
    pub async fn insert_item(&self, item: &ItemRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO items (
                id, background, body, accessory, head, glasses,
                owner_address, burned, created_at_block, created_at_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(item.id as i64)
        .bind(item.seed.background as i64)
        .bind(item.seed.body as i64)
        .bind(item.seed.accessory as i64)
        .bind(item.seed.head as i64)
        .bind(item.seed.glasses as i64)
        .bind(item.owner.as_ref().map(encode_address))
        .bind(item.burned as i64)
        .bind(item.created_at_block as i64)
        .bind(item.created_at_timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to insert item")?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the current owner of an item.
    pub async fn set_item_owner(&self, item_id: u64, owner: &Address) -> Result<()> {
        sqlx::query("UPDATE items SET owner_address = ? WHERE id = ?")
            .bind(encode_address(owner))
            .bind(item_id as i64)
            .execute(&self.pool)
            .await
            .context("Failed to set item owner")?;

        Ok(())
    }

    /// Mark an item as burned and clear its owner.
    pub async fn mark_item_burned(&self, item_id: u64) -> Result<()> {
        sqlx::query("UPDATE items SET burned = 1, owner_address = NULL WHERE id = ?")
            .bind(item_id as i64)
            .execute(&self.pool)
            .await
            .context("Failed to mark item burned")?;

        Ok(())
    }

    /// Record the winning bid of the item's auction at settlement.
    pub async fn set_item_winner(
        &self,
        item_id: u64,
        winner: &Address,
        winning_bid_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE items SET winner_address = ?, winning_bid_id = ? WHERE id = ?")
            .bind(encode_address(winner))
            .bind(winning_bid_id)
            .bind(item_id as i64)
            .execute(&self.pool)
            .await
            .context("Failed to set item winner")?;

        Ok(())
    }

    /// Record the settlement attribution for an item, write-once.
    ///
    /// The guard keeps the first written value forever; a second call with
    /// a different settler is a no-op. Returns `true` if the attribution
    /// was written by this call.
    pub async fn attribute_item(
        &self,
        item_id: u64,
        settler: &Address,
        settled_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE items
            SET settled_by_address = ?, settled_at = ?
            WHERE id = ? AND settled_by_address IS NULL
            "#,
        )
        .bind(encode_address(settler))
        .bind(settled_at)
        .bind(item_id as i64)
        .execute(&self.pool)
        .await
        .context("Failed to attribute item settlement")?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch a single item.
    pub async fn get_item(&self, item_id: u64) -> Result<Option<ItemRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, background, body, accessory, head, glasses,
                   owner_address, burned, settled_by_address, settled_at,
                   winning_bid_id, winner_address,
                   created_at_block, created_at_timestamp
            FROM items
            WHERE id = ?
            "#,
        )
        .bind(item_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_item_record).transpose()
    }

    /// Item ids still waiting for settlement attribution.
    ///
    /// Items 0 and 1 are excluded: the genesis mints have no settler.
    pub async fn items_missing_attribution(&self, limit: u32) -> Result<Vec<u64>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM items
            WHERE settled_by_address IS NULL AND id > 1
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list items missing attribution")?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<i64, _>("id") as u64)
            .collect())
    }

    /// Insert an observed settlement log.
    ///
    /// One row per auction; replays are ignored. If the stored row has no
    /// settler yet and this one does, the settler is filled in.
    pub async fn insert_settlement(&self, settlement: &SettlementRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settlements (
                item_id, tx_hash, log_index, settler_address,
                block_number, block_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                settler_address = excluded.settler_address
            WHERE settlements.settler_address IS NULL
              AND excluded.settler_address IS NOT NULL
            "#,
        )
        .bind(settlement.item_id as i64)
        .bind(encode_hash(&settlement.meta.tx_hash))
        .bind(settlement.meta.log_index as i64)
        .bind(settlement.settler.as_ref().map(encode_address))
        .bind(settlement.meta.block_number as i64)
        .bind(settlement.meta.block_timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to insert settlement")?;

        Ok(())
    }

    /// Fetch the settlement log for an auction, if observed.
    pub async fn get_settlement(&self, item_id: u64) -> Result<Option<SettlementRecord>> {
        let row = sqlx::query(
            r#"
            SELECT item_id, tx_hash, log_index, settler_address,
                   block_number, block_timestamp
            FROM settlements
            WHERE item_id = ?
            "#,
        )
        .bind(item_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let tx_hash: String = row.get("tx_hash");
            let settler: Option<String> = row.get("settler_address");
            Ok(SettlementRecord {
                item_id: row.get::<i64, _>("item_id") as u64,
                meta: EventMeta {
                    block_number: row.get::<i64, _>("block_number") as u64,
                    log_index: row.get::<i64, _>("log_index") as u64,
                    tx_hash: decode_hash(&tx_hash)?,
                    block_timestamp: row.get("block_timestamp"),
                },
                settler: settler.as_deref().map(decode_address).transpose()?,
            })
        })
        .transpose()
    }

    fn row_to_item_record(row: sqlx::sqlite::SqliteRow) -> Result<ItemRecord> {
        let owner: Option<String> = row.get("owner_address");
        let settled_by: Option<String> = row.get("settled_by_address");
        let winner: Option<String> = row.get("winner_address");

        Ok(ItemRecord {
            id: row.get::<i64, _>("id") as u64,
            seed: TraitSeed {
                background: row.get::<i64, _>("background") as u64,
                body: row.get::<i64, _>("body") as u64,
                accessory: row.get::<i64, _>("accessory") as u64,
                head: row.get::<i64, _>("head") as u64,
                glasses: row.get::<i64, _>("glasses") as u64,
            },
            owner: owner.as_deref().map(decode_address).transpose()?,
            burned: row.get::<i64, _>("burned") != 0,
            settled_by: settled_by.as_deref().map(decode_address).transpose()?,
            settled_at: row.get("settled_at"),
            winning_bid_id: row.get("winning_bid_id"),
            winner: winner.as_deref().map(decode_address).transpose()?,
            created_at_block: row.get::<i64, _>("created_at_block") as u64,
            created_at_timestamp: row.get("created_at_timestamp"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_storage;
    use super::*;
    use alloy::primitives::B256;

    fn test_item(id: u64) -> ItemRecord {
        ItemRecord {
            id,
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
            created_at_block: 100,
            created_at_timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_item_insert_is_idempotent_and_traits_immutable() {
        let (storage, _temp_db) = setup_storage().await;

        let item = test_item(42);
        assert!(storage.insert_item(&item).await.unwrap());

        // Replay with different traits must not change the stored seed.
        let mut replay = item.clone();
        replay.seed.head = 99;
        assert!(!storage.insert_item(&replay).await.unwrap());

        let got = storage.get_item(42).await.unwrap().unwrap();
        assert_eq!(got.seed.head, 4);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_attribution_is_write_once() {
        let (storage, _temp_db) = setup_storage().await;

        storage.insert_item(&test_item(11)).await.unwrap();

        let first = Address::repeat_byte(0x01);
        let second = Address::repeat_byte(0x02);

        assert!(storage.attribute_item(11, &first, 1000).await.unwrap());
        assert!(!storage.attribute_item(11, &second, 2000).await.unwrap());

        let got = storage.get_item(11).await.unwrap().unwrap();
        assert_eq!(got.settled_by, Some(first));
        assert_eq!(got.settled_at, Some(1000));

        storage.close().await;
    }

    #[tokio::test]
    async fn test_items_missing_attribution_excludes_genesis() {
        let (storage, _temp_db) = setup_storage().await;

        for id in 0..5 {
            storage.insert_item(&test_item(id)).await.unwrap();
        }
        storage
            .attribute_item(3, &Address::repeat_byte(0x01), 1)
            .await
            .unwrap();

        let pending = storage.items_missing_attribution(100).await.unwrap();
        assert_eq!(pending, vec![2, 4]);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_settlement_settler_backfill() {
        let (storage, _temp_db) = setup_storage().await;

        let meta = EventMeta {
            block_number: 500,
            log_index: 3,
            tx_hash: B256::repeat_byte(0xaa),
            block_timestamp: 1_700_000_100,
        };

        // First observed without a sender.
        storage
            .insert_settlement(&SettlementRecord {
                item_id: 9,
                meta,
                settler: None,
            })
            .await
            .unwrap();

        // Enriched replay fills the settler in.
        let settler = Address::repeat_byte(0x0c);
        storage
            .insert_settlement(&SettlementRecord {
                item_id: 9,
                meta,
                settler: Some(settler),
            })
            .await
            .unwrap();

        let got = storage.get_settlement(9).await.unwrap().unwrap();
        assert_eq!(got.settler, Some(settler));
        assert_eq!(got.meta.block_number, 500);

        storage.close().await;
    }
}
