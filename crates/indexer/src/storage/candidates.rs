//! Candidate, signature and feedback storage operations.

use super::{
    decode_address, decode_hash, encode_address, encode_hash, CandidateRecord,
    CandidateVersionRecord, EventMeta, FeedbackRecord, SignatureRecord, Storage,
};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use gavel_core::types::VoteSupport;
use sqlx::Row;

/// Canonical candidate key: lowercase proposer address joined with the
/// proposer-chosen slug.
pub fn candidate_key(proposer: &Address, slug: &str) -> String {
    format!("{}-{}", encode_address(proposer), slug)
}

impl Storage {
    /// Insert a newly created candidate. Replays are ignored.
    pub async fn insert_candidate(&self, candidate: &CandidateRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO candidates (id, proposer, slug, description, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&candidate.id)
        .bind(encode_address(&candidate.proposer))
        .bind(&candidate.slug)
        .bind(&candidate.description)
        .bind(candidate.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert candidate")?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite a candidate's description after an update event.
    pub async fn update_candidate(
        &self,
        candidate_id: &str,
        description: &str,
        updated_at: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE candidates SET description = ?, latest_update_at = ? WHERE id = ?",
        )
        .bind(description)
        .bind(updated_at)
        .bind(candidate_id)
        .execute(&self.pool)
        .await
        .context("Failed to update candidate")?;

        Ok(())
    }

    /// Mark a candidate as canceled.
    pub async fn cancel_candidate(&self, candidate_id: &str) -> Result<()> {
        sqlx::query("UPDATE candidates SET canceled = 1 WHERE id = ?")
            .bind(candidate_id)
            .execute(&self.pool)
            .await
            .context("Failed to cancel candidate")?;

        Ok(())
    }

    /// Append a candidate version and renumber the candidate's history.
    pub async fn insert_candidate_version(
        &self,
        version: &CandidateVersionRecord,
    ) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin candidate version transaction")?;

        let result = sqlx::query(
            r#"
            INSERT INTO candidate_versions (
                tx_hash, log_index, candidate_id, description,
                update_message, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(encode_hash(&version.meta.tx_hash))
        .bind(version.meta.log_index as i64)
        .bind(&version.candidate_id)
        .bind(&version.description)
        .bind(&version.update_message)
        .bind(version.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert candidate version")?;

        sqlx::query(
            r#"
            UPDATE candidate_versions SET version_number = (
                SELECT COUNT(*) FROM candidate_versions v2
                WHERE v2.candidate_id = candidate_versions.candidate_id
                  AND (v2.created_at < candidate_versions.created_at
                       OR (v2.created_at = candidate_versions.created_at
                           AND v2.log_index <= candidate_versions.log_index))
            )
            WHERE candidate_id = ?
            "#,
        )
        .bind(&version.candidate_id)
        .execute(&mut *tx)
        .await
        .context("Failed to renumber candidate versions")?;

        tx.commit()
            .await
            .context("Failed to commit candidate version transaction")?;

        Ok(result.rows_affected() > 0)
    }

    /// Append a sponsor signature and recompute the candidate's signature
    /// count in the same transaction.
    pub async fn insert_candidate_signature(&self, signature: &SignatureRecord) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin signature transaction")?;

        let result = sqlx::query(
            r#"
            INSERT INTO candidate_signatures (
                tx_hash, log_index, candidate_id, signer, sig,
                expiration_timestamp, reason, block_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(encode_hash(&signature.meta.tx_hash))
        .bind(signature.meta.log_index as i64)
        .bind(&signature.candidate_id)
        .bind(encode_address(&signature.signer))
        .bind(&signature.sig)
        .bind(signature.expiration_timestamp)
        .bind(signature.reason.as_deref())
        .bind(signature.meta.block_timestamp)
        .execute(&mut *tx)
        .await
        .context("Failed to insert candidate signature")?;

        // Derived count, so replays converge.
        sqlx::query(
            r#"
            UPDATE candidates SET signature_count = (
                SELECT COUNT(*) FROM candidate_signatures
                WHERE candidate_id = ?
            )
            WHERE id = ?
            "#,
        )
        .bind(&signature.candidate_id)
        .bind(&signature.candidate_id)
        .execute(&mut *tx)
        .await
        .context("Failed to recompute signature count")?;

        tx.commit()
            .await
            .context("Failed to commit signature transaction")?;

        Ok(result.rows_affected() > 0)
    }

    /// Append a feedback entry. Replays hit `DO NOTHING`.
    pub async fn insert_feedback(&self, feedback: &FeedbackRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO feedback (
                tx_hash, log_index, proposal_id, candidate_id,
                sender, support, reason, block_number, block_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(encode_hash(&feedback.meta.tx_hash))
        .bind(feedback.meta.log_index as i64)
        .bind(feedback.proposal_id.map(|v| v as i64))
        .bind(feedback.candidate_id.as_deref())
        .bind(encode_address(&feedback.sender))
        .bind(feedback.support.as_raw() as i64)
        .bind(feedback.reason.as_deref())
        .bind(feedback.meta.block_number as i64)
        .bind(feedback.meta.block_timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to insert feedback")?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch a single candidate by key.
    pub async fn get_candidate(&self, candidate_id: &str) -> Result<Option<CandidateRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, proposer, slug, description, created_at,
                   canceled, latest_update_at, signature_count
            FROM candidates
            WHERE id = ?
            "#,
        )
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let proposer: String = row.get("proposer");
            Ok(CandidateRecord {
                id: row.get("id"),
                proposer: decode_address(&proposer)?,
                slug: row.get("slug"),
                description: row.get("description"),
                created_at: row.get("created_at"),
                canceled: row.get::<i64, _>("canceled") != 0,
                latest_update_at: row.get("latest_update_at"),
                signature_count: row.get::<i64, _>("signature_count") as u64,
            })
        })
        .transpose()
    }

    /// Feedback on a proposal or candidate, in chain order.
    pub async fn get_feedback(
        &self,
        proposal_id: Option<u64>,
        candidate_id: Option<&str>,
    ) -> Result<Vec<FeedbackRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tx_hash, log_index, proposal_id, candidate_id,
                   sender, support, reason, block_number, block_timestamp
            FROM feedback
            WHERE (? IS NULL OR proposal_id = ?)
              AND (? IS NULL OR candidate_id = ?)
            ORDER BY block_number, log_index
            "#,
        )
        .bind(proposal_id.map(|v| v as i64))
        .bind(proposal_id.map(|v| v as i64))
        .bind(candidate_id)
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let tx_hash: String = row.get("tx_hash");
                let sender: String = row.get("sender");
                Ok(FeedbackRecord {
                    meta: EventMeta {
                        block_number: row.get::<i64, _>("block_number") as u64,
                        log_index: row.get::<i64, _>("log_index") as u64,
                        tx_hash: decode_hash(&tx_hash)?,
                        block_timestamp: row.get("block_timestamp"),
                    },
                    proposal_id: row.get::<Option<i64>, _>("proposal_id").map(|v| v as u64),
                    candidate_id: row.get("candidate_id"),
                    sender: decode_address(&sender)?,
                    support: VoteSupport::from_raw(row.get::<i64, _>("support") as u8)?,
                    reason: row.get("reason"),
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

    fn candidate(proposer: Address, slug: &str) -> CandidateRecord {
        CandidateRecord {
            id: candidate_key(&proposer, slug),
            proposer,
            slug: slug.to_string(),
            description: "initial".to_string(),
            created_at: 1_700_000_000,
            canceled: false,
            latest_update_at: None,
            signature_count: 0,
        }
    }

    #[test]
    fn test_candidate_key_is_lowercase() {
        let proposer = Address::repeat_byte(0xAB);
        let key = candidate_key(&proposer, "fund-the-garden");
        assert_eq!(key, format!("{:#x}-fund-the-garden", proposer));
        assert_eq!(key, key.to_lowercase());
    }

    #[tokio::test]
    async fn test_signature_count_is_recomputed() {
        let (storage, _temp_db) = setup_storage().await;

        let proposer = Address::repeat_byte(0x20);
        let cand = candidate(proposer, "slug");
        storage.insert_candidate(&cand).await.unwrap();

        let sig = |log_index: u64, tx_byte: u8| SignatureRecord {
            meta: EventMeta {
                block_number: 300,
                log_index,
                tx_hash: B256::repeat_byte(tx_byte),
                block_timestamp: 1_700_000_100,
            },
            candidate_id: cand.id.clone(),
            signer: Address::repeat_byte(tx_byte),
            sig: "0xdeadbeef".to_string(),
            expiration_timestamp: 1_800_000_000,
            reason: None,
        };

        assert!(storage.insert_candidate_signature(&sig(1, 0x01)).await.unwrap());
        assert!(storage.insert_candidate_signature(&sig(2, 0x02)).await.unwrap());
        // Replay does not double count.
        assert!(!storage.insert_candidate_signature(&sig(1, 0x01)).await.unwrap());

        let got = storage.get_candidate(&cand.id).await.unwrap().unwrap();
        assert_eq!(got.signature_count, 2);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_candidate_update_and_cancel() {
        let (storage, _temp_db) = setup_storage().await;

        let cand = candidate(Address::repeat_byte(0x21), "v2");
        storage.insert_candidate(&cand).await.unwrap();

        storage
            .update_candidate(&cand.id, "revised", 1_700_000_200)
            .await
            .unwrap();
        storage.cancel_candidate(&cand.id).await.unwrap();

        let got = storage.get_candidate(&cand.id).await.unwrap().unwrap();
        assert_eq!(got.description, "revised");
        assert_eq!(got.latest_update_at, Some(1_700_000_200));
        assert!(got.canceled);

        storage.close().await;
    }
}
