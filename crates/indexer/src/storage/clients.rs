//! Reward-program client storage operations.

use super::{
    decode_amount, decode_hash, encode_amount, encode_hash, ClientRecord, EventMeta,
    RewardEventRecord, RewardKind, Storage,
};
use alloy::primitives::U256;
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Insert a newly registered client. Replays are ignored.
    pub async fn insert_client(&self, client: &ClientRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO clients (id, name, description, registered_at_block)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(client.id as i64)
        .bind(&client.name)
        .bind(&client.description)
        .bind(client.registered_at_block as i64)
        .execute(&self.pool)
        .await
        .context("Failed to insert client")?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite a client's display metadata after an update event.
    pub async fn update_client_metadata(
        &self,
        client_id: u64,
        name: &str,
        description: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE clients SET name = ?, description = ? WHERE id = ?")
            .bind(name)
            .bind(description)
            .bind(client_id as i64)
            .execute(&self.pool)
            .await
            .context("Failed to update client metadata")?;

        Ok(())
    }

    /// Overwrite a client's badge URI.
    pub async fn set_client_badge(&self, client_id: u64, badge_uri: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE clients SET badge_uri = ? WHERE id = ?")
            .bind(badge_uri)
            .bind(client_id as i64)
            .execute(&self.pool)
            .await
            .context("Failed to set client badge")?;

        Ok(())
    }

    /// Overwrite a client's reward totals with authoritative on-chain
    /// values. Local arithmetic never feeds these columns.
    pub async fn overwrite_client_totals(
        &self,
        client_id: u64,
        total_rewarded: &U256,
        total_withdrawn: &U256,
    ) -> Result<()> {
        sqlx::query("UPDATE clients SET total_rewarded = ?, total_withdrawn = ? WHERE id = ?")
            .bind(encode_amount(total_rewarded))
            .bind(encode_amount(total_withdrawn))
            .bind(client_id as i64)
            .execute(&self.pool)
            .await
            .context("Failed to overwrite client totals")?;

        Ok(())
    }

    /// Append a reward ledger entry. Replays hit `DO NOTHING`.
    pub async fn insert_reward_event(&self, event: &RewardEventRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO reward_events (
                tx_hash, log_index, client_id, kind, amount,
                block_number, block_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(encode_hash(&event.meta.tx_hash))
        .bind(event.meta.log_index as i64)
        .bind(event.client_id as i64)
        .bind(event.kind.as_str())
        .bind(encode_amount(&event.amount))
        .bind(event.meta.block_number as i64)
        .bind(event.meta.block_timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to insert reward event")?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch a single client.
    pub async fn get_client(&self, client_id: u64) -> Result<Option<ClientRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, badge_uri,
                   total_rewarded, total_withdrawn, registered_at_block
            FROM clients
            WHERE id = ?
            "#,
        )
        .bind(client_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_client_record).transpose()
    }

    /// All registered clients, by id.
    pub async fn list_clients(&self) -> Result<Vec<ClientRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, badge_uri,
                   total_rewarded, total_withdrawn, registered_at_block
            FROM clients
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_client_record).collect()
    }

    /// The reward ledger for a client, in chain order.
    pub async fn get_reward_events(&self, client_id: u64) -> Result<Vec<RewardEventRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tx_hash, log_index, client_id, kind, amount,
                   block_number, block_timestamp
            FROM reward_events
            WHERE client_id = ?
            ORDER BY block_number, log_index
            "#,
        )
        .bind(client_id as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let tx_hash: String = row.get("tx_hash");
                let kind: String = row.get("kind");
                let amount: String = row.get("amount");
                Ok(RewardEventRecord {
                    meta: EventMeta {
                        block_number: row.get::<i64, _>("block_number") as u64,
                        log_index: row.get::<i64, _>("log_index") as u64,
                        tx_hash: decode_hash(&tx_hash)?,
                        block_timestamp: row.get("block_timestamp"),
                    },
                    client_id: row.get::<i64, _>("client_id") as u64,
                    kind: kind
                        .parse()
                        .map_err(|e| anyhow::anyhow!("Invalid reward kind in database: {}", e))?,
                    amount: decode_amount(&amount)?,
                })
            })
            .collect()
    }

    fn row_to_client_record(row: sqlx::sqlite::SqliteRow) -> Result<ClientRecord> {
        let total_rewarded: String = row.get("total_rewarded");
        let total_withdrawn: String = row.get("total_withdrawn");

        Ok(ClientRecord {
            id: row.get::<i64, _>("id") as u64,
            name: row.get("name"),
            description: row.get("description"),
            badge_uri: row.get("badge_uri"),
            total_rewarded: decode_amount(&total_rewarded)?,
            total_withdrawn: decode_amount(&total_withdrawn)?,
            registered_at_block: row.get::<i64, _>("registered_at_block") as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_storage;
    use super::*;
    use alloy::primitives::B256;

    fn client(id: u64) -> ClientRecord {
        ClientRecord {
            id,
            name: "gavel-mobile".to_string(),
            description: "Mobile bidding app".to_string(),
            badge_uri: None,
            total_rewarded: U256::ZERO,
            total_withdrawn: U256::ZERO,
            registered_at_block: 1000,
        }
    }

    #[tokio::test]
    async fn test_client_registration_is_idempotent() {
        let (storage, _temp_db) = setup_storage().await;

        assert!(storage.insert_client(&client(1)).await.unwrap());
        assert!(!storage.insert_client(&client(1)).await.unwrap());

        storage.close().await;
    }

    #[tokio::test]
    async fn test_totals_are_overwritten_not_summed() {
        let (storage, _temp_db) = setup_storage().await;

        storage.insert_client(&client(2)).await.unwrap();

        storage
            .overwrite_client_totals(2, &U256::from(100), &U256::from(40))
            .await
            .unwrap();
        // A second refresh replaces the values outright.
        storage
            .overwrite_client_totals(2, &U256::from(250), &U256::from(90))
            .await
            .unwrap();

        let got = storage.get_client(2).await.unwrap().unwrap();
        assert_eq!(got.total_rewarded, U256::from(250));
        assert_eq!(got.total_withdrawn, U256::from(90));

        storage.close().await;
    }

    #[tokio::test]
    async fn test_reward_ledger_replay_is_ignored() {
        let (storage, _temp_db) = setup_storage().await;

        storage.insert_client(&client(3)).await.unwrap();

        let entry = RewardEventRecord {
            meta: EventMeta {
                block_number: 1100,
                log_index: 2,
                tx_hash: B256::repeat_byte(0x07),
                block_timestamp: 1_700_001_000,
            },
            client_id: 3,
            kind: RewardKind::Reward,
            amount: U256::from(777),
        };

        assert!(storage.insert_reward_event(&entry).await.unwrap());
        assert!(!storage.insert_reward_event(&entry).await.unwrap());

        let ledger = storage.get_reward_events(3).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].kind, RewardKind::Reward);

        storage.close().await;
    }
}
