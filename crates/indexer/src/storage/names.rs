//! Persistent tier of the address-to-name cache.

use super::{decode_address, encode_address, NameRecord, Storage};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Fetch a cached resolution regardless of age. TTL filtering is the
    /// caller's concern (the in-memory tier shares the same cutoff).
    pub async fn get_cached_name(&self, address: &Address) -> Result<Option<NameRecord>> {
        let row = sqlx::query(
            r#"
            SELECT address, name, avatar, resolved_at
            FROM name_cache
            WHERE address = ?
            "#,
        )
        .bind(encode_address(address))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let address: String = row.get("address");
            Ok(NameRecord {
                address: decode_address(&address)?,
                name: row.get("name"),
                avatar: row.get("avatar"),
                resolved_at: row.get("resolved_at"),
            })
        })
        .transpose()
    }

    /// Store a resolution, overwriting any previous entry. Negative
    /// results (name = None) are cached the same way.
    pub async fn upsert_cached_name(&self, record: &NameRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO name_cache (address, name, avatar, resolved_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                name = excluded.name,
                avatar = excluded.avatar,
                resolved_at = excluded.resolved_at
            "#,
        )
        .bind(encode_address(&record.address))
        .bind(record.name.as_deref())
        .bind(record.avatar.as_deref())
        .bind(record.resolved_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert cached name")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_storage;
    use super::*;

    #[tokio::test]
    async fn test_name_cache_overwrites() {
        let (storage, _temp_db) = setup_storage().await;

        let address = Address::repeat_byte(0x60);

        // Negative result first.
        storage
            .upsert_cached_name(&NameRecord {
                address,
                name: None,
                avatar: None,
                resolved_at: 100,
            })
            .await
            .unwrap();

        let got = storage.get_cached_name(&address).await.unwrap().unwrap();
        assert_eq!(got.name, None);
        assert_eq!(got.resolved_at, 100);

        // Later resolution replaces it.
        storage
            .upsert_cached_name(&NameRecord {
                address,
                name: Some("bidder.eth".to_string()),
                avatar: Some("https://img.example/bidder.png".to_string()),
                resolved_at: 200,
            })
            .await
            .unwrap();

        let got = storage.get_cached_name(&address).await.unwrap().unwrap();
        assert_eq!(got.name.as_deref(), Some("bidder.eth"));
        assert_eq!(got.resolved_at, 200);

        storage.close().await;
    }
}
