//! Sync engine for historical and live block processing.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use super::RpcProvider;
use crate::config::SyncConfig;
use crate::handlers::Dispatcher;
use crate::rewards::RewardsOracle;
use crate::storage::Storage;

/// Attempts per event before the batch is abandoned. Transient storage
/// failures get a short backoff between attempts.
const APPLY_ATTEMPTS: u32 = 3;

/// The cursor to resume from. A cursor behind the configured start is
/// clamped to the block just before it, so the first fetched block
/// (`cursor + 1`) is the start block itself.
fn resume_cursor(last_block_number: u64, start_block: u64) -> u64 {
    last_block_number.max(start_block.saturating_sub(1))
}

/// Sync engine manages historical catch-up and live block synchronization.
pub struct SyncEngine<O> {
    provider: RpcProvider,
    storage: Storage,
    dispatcher: Dispatcher<O>,
    config: SyncConfig,
}

impl<O: RewardsOracle> SyncEngine<O> {
    /// Create a new sync engine.
    pub fn new(
        provider: RpcProvider,
        storage: Storage,
        dispatcher: Dispatcher<O>,
        config: SyncConfig,
    ) -> Self {
        Self {
            provider,
            storage,
            dispatcher,
            config,
        }
    }

    /// Run the sync loop (historical + live).
    ///
    /// This method runs indefinitely, processing historical blocks in batches
    /// until caught up, then switching to live polling mode.
    pub async fn run(&self) -> Result<()> {
        info!("Sync engine starting...");

        loop {
            let sync_state = self.storage.get_sync_state().await?;
            let current_block = self.provider.get_block_number().await?;
            let safe_block = current_block.saturating_sub(self.config.confirmations);

            let last_synced = resume_cursor(sync_state.last_block_number, self.config.start_block);

            info!(
                "Sync status: last={}, current={}, safe={}, confirmations={}",
                last_synced, current_block, safe_block, self.config.confirmations
            );

            let blocks_behind = safe_block.saturating_sub(last_synced);

            if blocks_behind == 0 {
                info!(
                    "Caught up, waiting {} seconds for new blocks...",
                    self.config.poll_interval_secs
                );
                tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
                continue;
            }

            if blocks_behind > self.config.batch_size {
                // Historical mode: batch sync
                self.sync_range(last_synced, (last_synced + self.config.batch_size).min(safe_block))
                    .await?;
            } else {
                // Live mode: process the remaining blocks, then wait
                self.sync_range(last_synced, safe_block).await?;

                tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
            }
        }
    }

    /// Process one contiguous block range and advance the cursor.
    ///
    /// Events are applied strictly in chain order. The cursor only moves
    /// after every event in the range has been applied, so a crash
    /// replays the range and the idempotent store absorbs the repeats.
    pub async fn sync_range(&self, from: u64, to: u64) -> Result<()> {
        info!(
            "Syncing blocks {} to {} ({} blocks)",
            from + 1,
            to,
            to - from
        );

        let events = self
            .provider
            .get_events(from + 1, to)
            .await
            .with_context(|| format!("Failed to fetch events for blocks {} to {}", from + 1, to))?;

        if !events.is_empty() {
            info!("Found {} protocol events in range", events.len());
        }

        for event in &events {
            self.apply_with_retry(event).await?;
        }

        let block_hash = self.provider.get_block_hash(to).await?;

        let mut state = self.storage.get_sync_state().await?;
        state.last_block_number = to;
        state.last_block_hash = block_hash;
        state.updated_at = chrono::Utc::now().timestamp();
        self.storage.update_sync_state(&state).await?;

        Ok(())
    }

    async fn apply_with_retry(&self, event: &crate::listener::ChainEvent) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.dispatcher.apply(event).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < APPLY_ATTEMPTS => {
                    warn!(
                        "Failed to apply event at block {} log {} (attempt {}): {}",
                        event.meta.block_number, event.meta.log_index, attempt, e
                    );
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "Giving up on event at block {} log {}",
                            event.meta.block_number, event.meta.log_index
                        )
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::resume_cursor;

    #[test]
    fn test_fresh_cursor_fetches_from_start_block() {
        // A fresh database initializes the cursor to start_block - 1;
        // the next fetched block must be the start block itself.
        let cursor = resume_cursor(99, 100);
        assert_eq!(cursor, 99);
        assert_eq!(cursor + 1, 100);
    }

    #[test]
    fn test_cursor_behind_start_block_is_clamped() {
        assert_eq!(resume_cursor(0, 100), 99);
        assert_eq!(resume_cursor(50, 100), 99);
    }

    #[test]
    fn test_cursor_ahead_of_start_block_is_kept() {
        assert_eq!(resume_cursor(500, 100), 500);
    }

    #[test]
    fn test_genesis_start_block() {
        assert_eq!(resume_cursor(0, 0), 0);
    }
}
