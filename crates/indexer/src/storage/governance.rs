//! Proposal, version and vote storage operations.

use super::{
    decode_address, decode_hash, encode_address, encode_hash, EventMeta, ProposalRecord,
    ProposalVersionRecord, Storage, VoteRecord,
};
use anyhow::{Context, Result};
use gavel_core::types::{ProposalStatus, VoteSupport};
use sqlx::Row;

impl Storage {
    /// Insert a newly created proposal in `PENDING` state. Replays are
    /// ignored.
    pub async fn insert_proposal(&self, proposal: &ProposalRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO proposals (
                id, proposer, description, status,
                created_at_block, created_at_timestamp,
                start_block, end_block, client_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(proposal.id as i64)
        .bind(encode_address(&proposal.proposer))
        .bind(&proposal.description)
        .bind(proposal.status.as_str())
        .bind(proposal.created_at_block as i64)
        .bind(proposal.created_at_timestamp)
        .bind(proposal.start_block as i64)
        .bind(proposal.end_block as i64)
        .bind(proposal.client_id.map(|v| v as i64))
        .execute(&self.pool)
        .await
        .context("Failed to insert proposal")?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite a proposal's description after an update event.
    pub async fn update_proposal_description(&self, id: u64, description: &str) -> Result<()> {
        sqlx::query("UPDATE proposals SET description = ? WHERE id = ?")
            .bind(description)
            .bind(id as i64)
            .execute(&self.pool)
            .await
            .context("Failed to update proposal description")?;

        Ok(())
    }

    /// Apply a lifecycle transition under the forward-only merge rule.
    ///
    /// Terminal rows are frozen; lower-rank replays are no-ops. When the
    /// transition is accepted, the matching transition timestamp column is
    /// set once. Returns the status stored after the call.
    ///
    /// Read-modify-write is safe here because the event stream has a
    /// single writer.
    pub async fn apply_proposal_status(
        &self,
        id: u64,
        incoming: ProposalStatus,
        at: i64,
    ) -> Result<ProposalStatus> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin status transaction")?;

        let current: String = sqlx::query_scalar("SELECT status FROM proposals WHERE id = ?")
            .bind(id as i64)
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("Status transition for unknown proposal {}", id))?;

        let current: ProposalStatus = current.parse()?;
        let merged = ProposalStatus::merge(current, incoming);

        if merged != current {
            let timestamp_column = match merged {
                ProposalStatus::Queued => Some("queued_at"),
                ProposalStatus::Executed => Some("executed_at"),
                ProposalStatus::Vetoed => Some("vetoed_at"),
                ProposalStatus::Cancelled => Some("cancelled_at"),
                _ => None,
            };

            match timestamp_column {
                Some(column) => {
                    let sql = format!(
                        "UPDATE proposals SET status = ?, {} = COALESCE({}, ?) WHERE id = ?",
                        column, column
                    );
                    sqlx::query(&sql)
                        .bind(merged.as_str())
                        .bind(at)
                        .bind(id as i64)
                        .execute(&mut *tx)
                        .await
                        .context("Failed to apply status transition")?;
                }
                None => {
                    sqlx::query("UPDATE proposals SET status = ? WHERE id = ?")
                        .bind(merged.as_str())
                        .bind(id as i64)
                        .execute(&mut *tx)
                        .await
                        .context("Failed to apply status transition")?;
                }
            }
        }

        tx.commit()
            .await
            .context("Failed to commit status transaction")?;

        Ok(merged)
    }

    /// Append a proposal version and renumber the proposal's history.
    ///
    /// `version_number` is a derived rank by creation time (log index
    /// breaking ties), so replays in any order converge.
    pub async fn insert_proposal_version(&self, version: &ProposalVersionRecord) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin version transaction")?;

        let result = sqlx::query(
            r#"
            INSERT INTO proposal_versions (
                tx_hash, log_index, proposal_id, description,
                update_message, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(encode_hash(&version.meta.tx_hash))
        .bind(version.meta.log_index as i64)
        .bind(version.proposal_id as i64)
        .bind(&version.description)
        .bind(&version.update_message)
        .bind(version.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert proposal version")?;

        sqlx::query(
            r#"
            UPDATE proposal_versions SET version_number = (
                SELECT COUNT(*) FROM proposal_versions v2
                WHERE v2.proposal_id = proposal_versions.proposal_id
                  AND (v2.created_at < proposal_versions.created_at
                       OR (v2.created_at = proposal_versions.created_at
                           AND v2.log_index <= proposal_versions.log_index))
            )
            WHERE proposal_id = ?
            "#,
        )
        .bind(version.proposal_id as i64)
        .execute(&mut *tx)
        .await
        .context("Failed to renumber proposal versions")?;

        tx.commit()
            .await
            .context("Failed to commit version transaction")?;

        Ok(result.rows_affected() > 0)
    }

    /// Append a vote and recompute the proposal's tallies from the vote
    /// log in the same transaction.
    pub async fn insert_vote(&self, vote: &VoteRecord) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin vote transaction")?;

        let result = sqlx::query(
            r#"
            INSERT INTO votes (
                tx_hash, log_index, proposal_id, voter, support,
                weight, reason, client_id, block_number, block_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(encode_hash(&vote.meta.tx_hash))
        .bind(vote.meta.log_index as i64)
        .bind(vote.proposal_id as i64)
        .bind(encode_address(&vote.voter))
        .bind(vote.support.as_raw() as i64)
        .bind(vote.weight as i64)
        .bind(vote.reason.as_deref())
        .bind(vote.client_id.map(|v| v as i64))
        .bind(vote.meta.block_number as i64)
        .bind(vote.meta.block_timestamp)
        .execute(&mut *tx)
        .await
        .context("Failed to insert vote")?;

        // Tallies are derived from the vote log, so replays converge.
        sqlx::query(
            r#"
            UPDATE proposals SET
                against_votes = (SELECT COALESCE(SUM(weight), 0) FROM votes
                                 WHERE proposal_id = ? AND support = 0),
                for_votes = (SELECT COALESCE(SUM(weight), 0) FROM votes
                             WHERE proposal_id = ? AND support = 1),
                abstain_votes = (SELECT COALESCE(SUM(weight), 0) FROM votes
                                 WHERE proposal_id = ? AND support = 2)
            WHERE id = ?
            "#,
        )
        .bind(vote.proposal_id as i64)
        .bind(vote.proposal_id as i64)
        .bind(vote.proposal_id as i64)
        .bind(vote.proposal_id as i64)
        .execute(&mut *tx)
        .await
        .context("Failed to recompute vote tallies")?;

        tx.commit()
            .await
            .context("Failed to commit vote transaction")?;

        Ok(result.rows_affected() > 0)
    }

    /// Credit a reward-program client for the vote emitted in the same
    /// transaction.
    pub async fn set_vote_client_id(
        &self,
        meta: &EventMeta,
        proposal_id: u64,
        client_id: u64,
    ) -> Result<()> {
        sqlx::query("UPDATE votes SET client_id = ? WHERE tx_hash = ? AND proposal_id = ?")
            .bind(client_id as i64)
            .bind(encode_hash(&meta.tx_hash))
            .bind(proposal_id as i64)
            .execute(&self.pool)
            .await
            .context("Failed to set vote client id")?;

        Ok(())
    }

    /// Credit a reward-program client for a proposal's creation.
    pub async fn set_proposal_client_id(&self, id: u64, client_id: u64) -> Result<()> {
        sqlx::query("UPDATE proposals SET client_id = ? WHERE id = ?")
            .bind(client_id as i64)
            .bind(id as i64)
            .execute(&self.pool)
            .await
            .context("Failed to set proposal client id")?;

        Ok(())
    }

    /// Fetch a single proposal.
    pub async fn get_proposal(&self, id: u64) -> Result<Option<ProposalRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, proposer, description, status,
                   created_at_block, created_at_timestamp,
                   start_block, end_block,
                   for_votes, against_votes, abstain_votes,
                   queued_at, executed_at, vetoed_at, cancelled_at, client_id
            FROM proposals
            WHERE id = ?
            "#,
        )
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_proposal_record).transpose()
    }

    /// Version history for a proposal, oldest first.
    pub async fn get_proposal_versions(
        &self,
        proposal_id: u64,
    ) -> Result<Vec<ProposalVersionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tx_hash, log_index, proposal_id, description,
                   update_message, created_at, version_number
            FROM proposal_versions
            WHERE proposal_id = ?
            ORDER BY version_number
            "#,
        )
        .bind(proposal_id as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let tx_hash: String = row.get("tx_hash");
                Ok(ProposalVersionRecord {
                    meta: EventMeta {
                        block_number: 0,
                        log_index: row.get::<i64, _>("log_index") as u64,
                        tx_hash: decode_hash(&tx_hash)?,
                        block_timestamp: row.get("created_at"),
                    },
                    proposal_id: row.get::<i64, _>("proposal_id") as u64,
                    description: row.get("description"),
                    update_message: row.get("update_message"),
                    created_at: row.get("created_at"),
                    version_number: row.get::<i64, _>("version_number") as u64,
                })
            })
            .collect()
    }

    /// All votes on a proposal, in chain order.
    pub async fn get_votes(&self, proposal_id: u64) -> Result<Vec<VoteRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tx_hash, log_index, proposal_id, voter, support,
                   weight, reason, client_id, block_number, block_timestamp
            FROM votes
            WHERE proposal_id = ?
            ORDER BY block_number, log_index
            "#,
        )
        .bind(proposal_id as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let tx_hash: String = row.get("tx_hash");
                let voter: String = row.get("voter");
                Ok(VoteRecord {
                    meta: EventMeta {
                        block_number: row.get::<i64, _>("block_number") as u64,
                        log_index: row.get::<i64, _>("log_index") as u64,
                        tx_hash: decode_hash(&tx_hash)?,
                        block_timestamp: row.get("block_timestamp"),
                    },
                    proposal_id: row.get::<i64, _>("proposal_id") as u64,
                    voter: decode_address(&voter)?,
                    support: VoteSupport::from_raw(row.get::<i64, _>("support") as u8)?,
                    weight: row.get::<i64, _>("weight") as u64,
                    reason: row.get("reason"),
                    client_id: row.get::<Option<i64>, _>("client_id").map(|v| v as u64),
                })
            })
            .collect()
    }

    pub(crate) fn row_to_proposal_record(row: sqlx::sqlite::SqliteRow) -> Result<ProposalRecord> {
        let proposer: String = row.get("proposer");
        let status: String = row.get("status");

        Ok(ProposalRecord {
            id: row.get::<i64, _>("id") as u64,
            proposer: decode_address(&proposer)?,
            description: row.get("description"),
            status: status.parse()?,
            created_at_block: row.get::<i64, _>("created_at_block") as u64,
            created_at_timestamp: row.get("created_at_timestamp"),
            start_block: row.get::<i64, _>("start_block") as u64,
            end_block: row.get::<i64, _>("end_block") as u64,
            for_votes: row.get::<i64, _>("for_votes") as u64,
            against_votes: row.get::<i64, _>("against_votes") as u64,
            abstain_votes: row.get::<i64, _>("abstain_votes") as u64,
            queued_at: row.get("queued_at"),
            executed_at: row.get("executed_at"),
            vetoed_at: row.get("vetoed_at"),
            cancelled_at: row.get("cancelled_at"),
            client_id: row.get::<Option<i64>, _>("client_id").map(|v| v as u64),
        })
    }
}
