//! Sync state storage operations.

use super::{decode_hash, encode_hash, Storage, SyncState};
use alloy::primitives::B256;
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Get the current sync state.
    pub async fn get_sync_state(&self) -> Result<SyncState> {
        let row = sqlx::query(
            r#"
            SELECT last_block_number, last_block_hash, updated_at, chain_id
            FROM sync_state
            WHERE id = 1
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch sync state")?;

        let hash_text: String = row.get("last_block_hash");
        let last_block_hash = if hash_text.is_empty() {
            B256::ZERO
        } else {
            decode_hash(&hash_text)?
        };

        Ok(SyncState {
            last_block_number: row.get::<i64, _>("last_block_number") as u64,
            last_block_hash,
            updated_at: row.get("updated_at"),
            chain_id: row.get::<i64, _>("chain_id") as u64,
        })
    }

    /// Update the sync state.
    pub async fn update_sync_state(&self, state: &SyncState) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_state
            SET last_block_number = ?,
                last_block_hash = ?,
                updated_at = ?,
                chain_id = ?
            WHERE id = 1
            "#,
        )
        .bind(state.last_block_number as i64)
        .bind(encode_hash(&state.last_block_hash))
        .bind(state.updated_at)
        .bind(state.chain_id as i64)
        .execute(&self.pool)
        .await
        .context("Failed to update sync state")?;

        Ok(())
    }

    /// Initialize sync state for a new chain.
    pub async fn initialize_sync_state(
        &self,
        chain_id: u64,
        start_block: u64,
        block_hash: B256,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        self.update_sync_state(&SyncState {
            last_block_number: start_block,
            last_block_hash: block_hash,
            updated_at: now,
            chain_id,
        })
        .await
        .context("Failed to initialize sync state")
    }
}
