//! Treasury flow storage operations.

use super::{
    decode_address, decode_amount, decode_hash, encode_address, encode_amount, encode_hash,
    EventMeta, FlowDirection, Storage, TreasuryRecord,
};
use alloy::primitives::U256;
use anyhow::{Context, Result};
use sqlx::Row;

/// Treasury totals derived from the flow log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreasuryTotals {
    /// Sum of all inflows (wei)
    pub total_in: U256,

    /// Sum of all outflows (wei)
    pub total_out: U256,
}

impl TreasuryTotals {
    /// Net balance implied by the observed flows.
    pub fn balance(&self) -> U256 {
        self.total_in.saturating_sub(self.total_out)
    }
}

impl Storage {
    /// Append a treasury flow. Replays hit `DO NOTHING`.
    pub async fn insert_treasury_transaction(&self, flow: &TreasuryRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO treasury_transactions (
                tx_hash, log_index, direction, counterparty, amount,
                block_number, block_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(encode_hash(&flow.meta.tx_hash))
        .bind(flow.meta.log_index as i64)
        .bind(flow.direction.as_str())
        .bind(encode_address(&flow.counterparty))
        .bind(encode_amount(&flow.amount))
        .bind(flow.meta.block_number as i64)
        .bind(flow.meta.block_timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to insert treasury transaction")?;

        Ok(result.rows_affected() > 0)
    }

    /// The most recent treasury flows, newest first.
    pub async fn treasury_flows(&self, limit: u32) -> Result<Vec<TreasuryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tx_hash, log_index, direction, counterparty, amount,
                   block_number, block_timestamp
            FROM treasury_transactions
            ORDER BY block_number DESC, log_index DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let tx_hash: String = row.get("tx_hash");
                let direction: String = row.get("direction");
                let counterparty: String = row.get("counterparty");
                let amount: String = row.get("amount");
                Ok(TreasuryRecord {
                    meta: EventMeta {
                        block_number: row.get::<i64, _>("block_number") as u64,
                        log_index: row.get::<i64, _>("log_index") as u64,
                        tx_hash: decode_hash(&tx_hash)?,
                        block_timestamp: row.get("block_timestamp"),
                    },
                    direction: direction
                        .parse()
                        .map_err(|e| anyhow::anyhow!("Invalid flow direction in database: {}", e))?,
                    counterparty: decode_address(&counterparty)?,
                    amount: decode_amount(&amount)?,
                })
            })
            .collect()
    }

    /// Total in/out flows. Amounts are TEXT in SQLite, so the summation
    /// happens here in full 256-bit precision.
    pub async fn treasury_totals(&self) -> Result<TreasuryTotals> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT direction, amount FROM treasury_transactions")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch treasury flows")?;

        let mut total_in = U256::ZERO;
        let mut total_out = U256::ZERO;
        for (direction, amount) in rows {
            let amount = decode_amount(&amount)?;
            match direction.parse::<FlowDirection>() {
                Ok(FlowDirection::In) => total_in += amount,
                Ok(FlowDirection::Out) => total_out += amount,
                Err(e) => anyhow::bail!("Invalid flow direction in database: {}", e),
            }
        }

        Ok(TreasuryTotals {
            total_in,
            total_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_storage;
    use super::*;
    use alloy::primitives::{Address, B256};

    fn flow(log_index: u64, tx_byte: u8, direction: FlowDirection, amount: u64) -> TreasuryRecord {
        TreasuryRecord {
            meta: EventMeta {
                block_number: 400,
                log_index,
                tx_hash: B256::repeat_byte(tx_byte),
                block_timestamp: 1_700_002_000,
            },
            direction,
            counterparty: Address::repeat_byte(tx_byte),
            amount: U256::from(amount),
        }
    }

    #[tokio::test]
    async fn test_treasury_totals() {
        let (storage, _temp_db) = setup_storage().await;

        storage
            .insert_treasury_transaction(&flow(1, 0x01, FlowDirection::In, 1000))
            .await
            .unwrap();
        storage
            .insert_treasury_transaction(&flow(2, 0x02, FlowDirection::In, 500))
            .await
            .unwrap();
        storage
            .insert_treasury_transaction(&flow(3, 0x03, FlowDirection::Out, 300))
            .await
            .unwrap();
        // Replay changes nothing.
        storage
            .insert_treasury_transaction(&flow(1, 0x01, FlowDirection::In, 1000))
            .await
            .unwrap();

        let totals = storage.treasury_totals().await.unwrap();
        assert_eq!(totals.total_in, U256::from(1500));
        assert_eq!(totals.total_out, U256::from(300));
        assert_eq!(totals.balance(), U256::from(1200));

        storage.close().await;
    }
}
