//! Transfer, delegation and voter-aggregate storage operations.

use super::{
    decode_address, encode_address, encode_hash, DelegationRecord, Storage, TransferRecord,
    VoterRecord,
};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Append an ownership transfer. Replays hit `DO NOTHING`.
    pub async fn insert_transfer(&self, transfer: &TransferRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO transfers (
                tx_hash, log_index, item_id, from_address, to_address,
                block_number, block_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(encode_hash(&transfer.meta.tx_hash))
        .bind(transfer.meta.log_index as i64)
        .bind(transfer.item_id as i64)
        .bind(encode_address(&transfer.from))
        .bind(encode_address(&transfer.to))
        .bind(transfer.meta.block_number as i64)
        .bind(transfer.meta.block_timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to insert transfer")?;

        Ok(result.rows_affected() > 0)
    }

    /// Append a delegation change. Replays hit `DO NOTHING`.
    pub async fn insert_delegation(&self, delegation: &DelegationRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO delegations (
                tx_hash, log_index, delegator, from_delegate, to_delegate,
                block_number, block_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(encode_hash(&delegation.meta.tx_hash))
        .bind(delegation.meta.log_index as i64)
        .bind(encode_address(&delegation.delegator))
        .bind(encode_address(&delegation.from_delegate))
        .bind(encode_address(&delegation.to_delegate))
        .bind(delegation.meta.block_number as i64)
        .bind(delegation.meta.block_timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to insert delegation")?;

        Ok(result.rows_affected() > 0)
    }

    /// The current delegate of a token holder: the target of the latest
    /// delegation in chain order, defaulting to self-delegation.
    pub async fn current_delegate(&self, holder: &Address) -> Result<Address> {
        let delegate: Option<String> = sqlx::query_scalar(
            r#"
            SELECT to_delegate FROM delegations
            WHERE delegator = ?
            ORDER BY block_number DESC, log_index DESC
            LIMIT 1
            "#,
        )
        .bind(encode_address(holder))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up current delegate")?;

        match delegate {
            Some(text) => decode_address(&text),
            None => Ok(*holder),
        }
    }

    /// Overwrite a delegate's voting power from the event payload.
    ///
    /// The chain is authoritative for this number; it is never derived
    /// locally.
    pub async fn set_delegated_votes(&self, delegate: &Address, votes: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO voters (address, delegated_votes)
            VALUES (?, ?)
            ON CONFLICT(address) DO UPDATE SET delegated_votes = excluded.delegated_votes
            "#,
        )
        .bind(encode_address(delegate))
        .bind(votes)
        .execute(&self.pool)
        .await
        .context("Failed to set delegated votes")?;

        Ok(())
    }

    /// Recompute a delegate's derived aggregates from the stored streams:
    /// lifetime vote count and the set of items whose owners currently
    /// delegate to them.
    pub async fn recompute_voter(&self, delegate: &Address) -> Result<()> {
        let address = encode_address(delegate);

        let total_votes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE voter = ?")
            .bind(&address)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count votes")?;

        let represented: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT i.id FROM items i
            WHERE i.burned = 0
              AND i.owner_address IS NOT NULL
              AND COALESCE(
                    (SELECT d.to_delegate FROM delegations d
                     WHERE d.delegator = i.owner_address
                     ORDER BY d.block_number DESC, d.log_index DESC
                     LIMIT 1),
                    i.owner_address
                  ) = ?
            ORDER BY i.id
            "#,
        )
        .bind(&address)
        .fetch_all(&self.pool)
        .await
        .context("Failed to collect represented items")?;

        let represented: Vec<u64> = represented.into_iter().map(|v| v as u64).collect();
        let represented_json =
            serde_json::to_string(&represented).context("Failed to encode represented items")?;

        sqlx::query(
            r#"
            INSERT INTO voters (address, total_votes, represented_item_ids)
            VALUES (?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                total_votes = excluded.total_votes,
                represented_item_ids = excluded.represented_item_ids
            "#,
        )
        .bind(&address)
        .bind(total_votes)
        .bind(represented_json)
        .execute(&self.pool)
        .await
        .context("Failed to store voter aggregates")?;

        Ok(())
    }

    /// Fetch a single voter row.
    pub async fn get_voter(&self, delegate: &Address) -> Result<Option<VoterRecord>> {
        let row = sqlx::query(
            r#"
            SELECT address, delegated_votes, total_votes, represented_item_ids
            FROM voters
            WHERE address = ?
            "#,
        )
        .bind(encode_address(delegate))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_voter_record).transpose()
    }

    pub(crate) fn row_to_voter_record(row: sqlx::sqlite::SqliteRow) -> Result<VoterRecord> {
        let address: String = row.get("address");
        let represented_json: String = row.get("represented_item_ids");

        Ok(VoterRecord {
            address: decode_address(&address)?,
            delegated_votes: row.get("delegated_votes"),
            total_votes: row.get::<i64, _>("total_votes") as u64,
            represented_item_ids: serde_json::from_str(&represented_json)
                .context("Invalid represented_item_ids JSON in database")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_storage;
    use super::super::{EventMeta, ItemRecord};
    use super::*;
    use alloy::primitives::B256;
    use gavel_core::types::TraitSeed;

    fn meta(block: u64, log_index: u64, tx_byte: u8) -> EventMeta {
        EventMeta {
            block_number: block,
            log_index,
            tx_hash: B256::repeat_byte(tx_byte),
            block_timestamp: 1_700_000_000 + block as i64,
        }
    }

    async fn seed_item(storage: &Storage, id: u64, owner: Address) {
        storage
            .insert_item(&ItemRecord {
                id,
                seed: TraitSeed {
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
                created_at_block: 1,
                created_at_timestamp: 1,
            })
            .await
            .unwrap();
        storage.set_item_owner(id, &owner).await.unwrap();
    }

    #[tokio::test]
    async fn test_current_delegate_defaults_to_self() {
        let (storage, _temp_db) = setup_storage().await;

        let holder = Address::repeat_byte(0x30);
        assert_eq!(storage.current_delegate(&holder).await.unwrap(), holder);

        let delegate = Address::repeat_byte(0x31);
        storage
            .insert_delegation(&DelegationRecord {
                meta: meta(10, 1, 0x01),
                delegator: holder,
                from_delegate: holder,
                to_delegate: delegate,
            })
            .await
            .unwrap();

        assert_eq!(storage.current_delegate(&holder).await.unwrap(), delegate);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_latest_delegation_wins() {
        let (storage, _temp_db) = setup_storage().await;

        let holder = Address::repeat_byte(0x30);
        let first = Address::repeat_byte(0x31);
        let second = Address::repeat_byte(0x32);

        storage
            .insert_delegation(&DelegationRecord {
                meta: meta(10, 1, 0x01),
                delegator: holder,
                from_delegate: holder,
                to_delegate: first,
            })
            .await
            .unwrap();
        storage
            .insert_delegation(&DelegationRecord {
                meta: meta(20, 1, 0x02),
                delegator: holder,
                from_delegate: first,
                to_delegate: second,
            })
            .await
            .unwrap();

        assert_eq!(storage.current_delegate(&holder).await.unwrap(), second);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_recompute_voter_represents_delegated_items() {
        let (storage, _temp_db) = setup_storage().await;

        let owner_a = Address::repeat_byte(0x40);
        let owner_b = Address::repeat_byte(0x41);
        let delegate = Address::repeat_byte(0x42);

        seed_item(&storage, 2, owner_a).await;
        seed_item(&storage, 3, owner_b).await;
        seed_item(&storage, 4, owner_b).await;

        // owner_b delegates to `delegate`; owner_a self-delegates.
        storage
            .insert_delegation(&DelegationRecord {
                meta: meta(10, 1, 0x01),
                delegator: owner_b,
                from_delegate: owner_b,
                to_delegate: delegate,
            })
            .await
            .unwrap();

        storage.recompute_voter(&delegate).await.unwrap();
        storage.recompute_voter(&owner_a).await.unwrap();

        let got = storage.get_voter(&delegate).await.unwrap().unwrap();
        assert_eq!(got.represented_item_ids, vec![3, 4]);

        let got = storage.get_voter(&owner_a).await.unwrap().unwrap();
        assert_eq!(got.represented_item_ids, vec![2]);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_delegated_votes_is_overwritten() {
        let (storage, _temp_db) = setup_storage().await;

        let delegate = Address::repeat_byte(0x50);
        storage.set_delegated_votes(&delegate, 3).await.unwrap();
        storage.set_delegated_votes(&delegate, 5).await.unwrap();

        let got = storage.get_voter(&delegate).await.unwrap().unwrap();
        assert_eq!(got.delegated_votes, 5);

        storage.close().await;
    }
}
