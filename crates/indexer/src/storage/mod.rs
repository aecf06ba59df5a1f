//! Storage layer for the Gavel indexer.
//!
//! This module provides database operations for:
//! - Items, auctions, bids and settlements
//! - Proposals, votes, candidates and feedback
//! - Voter aggregates, clients, treasury flows
//! - The name cache and sync state
//!
//! Write discipline: append-only tables insert with
//! `ON CONFLICT ... DO NOTHING` on `(tx_hash, log_index)`; mutable rows
//! upsert with guarded `DO UPDATE` clauses so replaying any block range
//! converges to the same state.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub mod auctions;
pub mod candidates;
pub mod clients;
pub mod governance;
pub mod items;
pub mod names;
pub mod sync;
pub mod treasury;
pub mod types;
pub mod voters;

pub use candidates::candidate_key;
pub use treasury::TreasuryTotals;
pub use types::*;

/// Database storage for the indexer.
///
/// Provides async access to SQLite with connection pooling.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// Creates the database file if it doesn't exist. Pass `None` for the
    /// pool bounds to use the defaults (5 max, 1 min).
    pub async fn new(
        database_url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(5))
            .min_connections(min_connections.unwrap_or(1))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(
        path: P,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let database_url = format!("sqlite://{}", path.display());
        Self::new(&database_url, max_connections, min_connections).await
    }

    /// Run database migrations.
    ///
    /// Call once during initialization to ensure the schema is up to date.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Get a reference to the connection pool.
    ///
    /// Useful for custom queries or transactions.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let item_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;

        let auction_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM auctions")
            .fetch_one(&self.pool)
            .await?;

        let proposal_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM proposals")
            .fetch_one(&self.pool)
            .await?;

        let vote_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM votes")
            .fetch_one(&self.pool)
            .await?;

        let client_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clients")
            .fetch_one(&self.pool)
            .await?;

        let sync_state = self.get_sync_state().await?;

        Ok(DatabaseStats {
            item_count: item_count as u64,
            auction_count: auction_count as u64,
            proposal_count: proposal_count as u64,
            vote_count: vote_count as u64,
            client_count: client_count as u64,
            last_block_number: sync_state.last_block_number,
        })
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of items
    pub item_count: u64,

    /// Total number of auctions
    pub auction_count: u64,

    /// Total number of proposals
    pub proposal_count: u64,

    /// Total number of votes
    pub vote_count: u64,

    /// Total number of registered clients
    pub client_count: u64,

    /// Last processed block number
    pub last_block_number: u64,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Storage;
    use tempfile::NamedTempFile;

    pub async fn setup_storage() -> (Storage, NamedTempFile) {
        let temp_db = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp_db.path(), None, None)
            .await
            .unwrap();
        storage.run_migrations().await.unwrap();
        (storage, temp_db)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::setup_storage;

    #[tokio::test]
    async fn test_storage_creation() {
        let (storage, _temp_db) = setup_storage().await;

        storage.health_check().await.unwrap();

        storage.close().await;
    }

    #[tokio::test]
    async fn test_database_stats() {
        let (storage, _temp_db) = setup_storage().await;

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.item_count, 0);
        assert_eq!(stats.auction_count, 0);
        assert_eq!(stats.proposal_count, 0);
        assert_eq!(stats.vote_count, 0);
        assert_eq!(stats.client_count, 0);
        assert_eq!(stats.last_block_number, 0);

        storage.close().await;
    }
}
