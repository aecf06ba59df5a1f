//! Settlement attribution resolver.
//!
//! Event logs alone do not say who settled every auction: the stream can
//! start mid-history, and a settlement's transaction sender is only
//! available through an extra lookup. This resolver periodically sweeps
//! items whose settlement fields are still null and fills them in,
//! write-once, from the local settlement log first and an external
//! endpoint as fallback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use gavel_core::attribution::settled_id;
use gavel_core::error::EngineError;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::storage::Storage;

/// How many unattributed items one sweep examines.
const SWEEP_LIMIT: u32 = 200;

/// A resolved settlement: who sent the settling transaction and when it
/// landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementInfo {
    /// Transaction sender of the settlement.
    pub settler: Address,

    /// Settlement time (unix seconds).
    pub settled_at: i64,
}

/// External source of settlement senders for auctions the indexer never
/// observed directly.
pub trait SettlementLookup {
    /// Look up who settled the given auction.
    ///
    /// `Ok(None)` means the source has no record; the item stays
    /// unresolved and is retried on the next sweep.
    fn settlement_sender(
        &self,
        auction_id: u64,
    ) -> impl std::future::Future<Output = gavel_core::Result<Option<SettlementInfo>>> + Send;
}

#[derive(Deserialize)]
struct SettlementResponse {
    settler: Address,
    settled_at: i64,
}

/// Settlement lookup against an external log-index HTTP endpoint.
pub struct LogIndexClient {
    client: reqwest::Client,
    base_url: String,
}

impl LogIndexClient {
    /// Create a client for the given endpoint.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build log index HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl SettlementLookup for LogIndexClient {
    async fn settlement_sender(
        &self,
        auction_id: u64,
    ) -> gavel_core::Result<Option<SettlementInfo>> {
        let url = format!("{}/settlements/{}", self.base_url, auction_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::TransientNetwork(e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            reqwest::StatusCode::TOO_MANY_REQUESTS => Err(EngineError::RateLimited),
            status if status.is_success() => {
                let body: SettlementResponse = response
                    .json()
                    .await
                    .map_err(|e| EngineError::Decode(e.to_string()))?;
                Ok(Some(SettlementInfo {
                    settler: body.settler,
                    settled_at: body.settled_at,
                }))
            }
            status => Err(EngineError::TransientNetwork(format!(
                "Settlement endpoint returned {}",
                status
            ))),
        }
    }
}

/// Periodic sweeper that backfills settlement attribution.
pub struct SettlementResolver<L> {
    storage: Storage,
    lookup: Option<L>,
    interval: Duration,
    max_concurrency: usize,
}

impl<L: SettlementLookup + Sync> SettlementResolver<L> {
    /// Create a resolver. Without a lookup, only the local settlement
    /// log feeds attribution.
    pub fn new(storage: Storage, lookup: Option<L>, config: &ResolverConfig) -> Self {
        Self {
            storage,
            lookup,
            interval: Duration::from_secs(config.refresh_interval_secs),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Run the periodic sweep loop. Spawned as a background task.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Settlement resolver starting with interval: {:?}",
            self.interval
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            interval.tick().await;

            match self.resolve_pending().await {
                Ok(0) => {}
                Ok(resolved) => info!("Settlement sweep attributed {} items", resolved),
                Err(e) => warn!("Settlement sweep failed: {}", e),
            }
        }
    }

    /// Sweep unattributed items once with bounded concurrency. Returns
    /// how many were attributed.
    ///
    /// A rate-limit answer from the external source stops further
    /// lookups for the rest of the sweep; everything left over is
    /// picked up next time.
    pub async fn resolve_pending(&self) -> Result<usize> {
        let pending = self.storage.items_missing_attribution(SWEEP_LIMIT).await?;

        let rate_limited = AtomicBool::new(false);

        let outcomes: Vec<bool> = stream::iter(pending)
            .map(|item_id| {
                let rate_limited = &rate_limited;
                async move {
                    if rate_limited.load(Ordering::SeqCst) {
                        return false;
                    }
                    match self.resolve_item(item_id).await {
                        Ok(attributed) => attributed,
                        Err(EngineError::RateLimited) => {
                            warn!("Settlement source rate limited; stopping sweep");
                            rate_limited.store(true, Ordering::SeqCst);
                            false
                        }
                        Err(e) => {
                            debug!("Item {} stays unresolved: {}", item_id, e);
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        Ok(outcomes.into_iter().filter(|attributed| *attributed).count())
    }

    async fn resolve_item(&self, item_id: u64) -> gavel_core::Result<bool> {
        let Some(auction_id) = settled_id(item_id) else {
            // Genesis items have no settling auction.
            return Ok(false);
        };

        // Local settlement log first.
        let local = self
            .storage
            .get_settlement(auction_id)
            .await
            .map_err(|e| EngineError::TransientNetwork(e.to_string()))?;

        let info = match local {
            Some(settlement) => match settlement.settler {
                Some(settler) => Some(SettlementInfo {
                    settler,
                    settled_at: settlement.meta.block_timestamp,
                }),
                None => None,
            },
            None => None,
        };

        let info = match info {
            Some(info) => Some(info),
            None => match &self.lookup {
                Some(lookup) => lookup.settlement_sender(auction_id).await?,
                None => None,
            },
        };

        let Some(info) = info else {
            return Err(EngineError::UnresolvedAttribution { item_id });
        };

        self.storage
            .attribute_item(item_id, &info.settler, info.settled_at)
            .await
            .map_err(|e| EngineError::TransientNetwork(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::setup_storage;
    use crate::storage::{EventMeta, ItemRecord, SettlementRecord};
    use alloy::primitives::B256;
    use gavel_core::types::TraitSeed;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeLookup {
        answers: HashMap<u64, SettlementInfo>,
        calls: Mutex<Vec<u64>>,
        rate_limited: bool,
    }

    impl FakeLookup {
        fn new(answers: HashMap<u64, SettlementInfo>) -> Self {
            Self {
                answers,
                calls: Mutex::new(Vec::new()),
                rate_limited: false,
            }
        }
    }

    impl SettlementLookup for FakeLookup {
        async fn settlement_sender(
            &self,
            auction_id: u64,
        ) -> gavel_core::Result<Option<SettlementInfo>> {
            self.calls.lock().unwrap().push(auction_id);
            if self.rate_limited {
                return Err(EngineError::RateLimited);
            }
            Ok(self.answers.get(&auction_id).copied())
        }
    }

    fn config() -> ResolverConfig {
        ResolverConfig::default()
    }

    async fn insert_item(storage: &Storage, id: u64) {
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
                created_at_block: 100,
                created_at_timestamp: 1_700_000_000,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resolves_from_local_settlement_log() {
        let (storage, _temp_db) = setup_storage().await;

        let settler = Address::repeat_byte(0x21);
        insert_item(&storage, 12).await;
        storage
            .insert_settlement(&SettlementRecord {
                item_id: 11,
                meta: EventMeta {
                    block_number: 500,
                    log_index: 0,
                    tx_hash: B256::repeat_byte(0x01),
                    block_timestamp: 1_700_000_500,
                },
                settler: Some(settler),
            })
            .await
            .unwrap();

        let resolver = SettlementResolver::new(storage.clone(), None::<FakeLookup>, &config());
        let resolved = resolver.resolve_pending().await.unwrap();
        assert_eq!(resolved, 1);

        let item = storage.get_item(12).await.unwrap().unwrap();
        assert_eq!(item.settled_by, Some(settler));
        assert_eq!(item.settled_at, Some(1_700_000_500));

        // No external lookup was needed and nothing is left pending.
        assert!(storage
            .items_missing_attribution(10)
            .await
            .unwrap()
            .is_empty());

        storage.close().await;
    }

    #[tokio::test]
    async fn test_falls_back_to_external_lookup() {
        let (storage, _temp_db) = setup_storage().await;

        let settler = Address::repeat_byte(0x42);
        insert_item(&storage, 12).await;

        let mut answers = HashMap::new();
        answers.insert(
            11,
            SettlementInfo {
                settler,
                settled_at: 1_600_000_000,
            },
        );
        let lookup = FakeLookup::new(answers);

        let resolver = SettlementResolver::new(storage.clone(), Some(lookup), &config());
        assert_eq!(resolver.resolve_pending().await.unwrap(), 1);

        let item = storage.get_item(12).await.unwrap().unwrap();
        assert_eq!(item.settled_by, Some(settler));

        // The lookup was asked about the settling auction, not the item.
        let lookup = resolver.lookup.as_ref().unwrap();
        assert_eq!(*lookup.calls.lock().unwrap(), vec![11]);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_unresolved_items_stay_null() {
        let (storage, _temp_db) = setup_storage().await;

        insert_item(&storage, 15).await;

        let resolver = SettlementResolver::new(
            storage.clone(),
            Some(FakeLookup::new(HashMap::new())),
            &config(),
        );
        assert_eq!(resolver.resolve_pending().await.unwrap(), 0);

        let item = storage.get_item(15).await.unwrap().unwrap();
        assert_eq!(item.settled_by, None);
        assert_eq!(item.settled_at, None);

        // Still pending for the next sweep.
        assert_eq!(storage.items_missing_attribution(10).await.unwrap(), vec![15]);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_rate_limit_aborts_sweep() {
        let (storage, _temp_db) = setup_storage().await;

        insert_item(&storage, 12).await;
        insert_item(&storage, 13).await;

        let mut lookup = FakeLookup::new(HashMap::new());
        lookup.rate_limited = true;

        // One lookup at a time makes the stop observable.
        let config = ResolverConfig {
            max_concurrency: 1,
            ..ResolverConfig::default()
        };
        let resolver = SettlementResolver::new(storage.clone(), Some(lookup), &config);
        assert_eq!(resolver.resolve_pending().await.unwrap(), 0);

        // First lookup answered 429; the sweep stopped there.
        let lookup = resolver.lookup.as_ref().unwrap();
        assert_eq!(lookup.calls.lock().unwrap().len(), 1);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_reward_item_maps_to_prior_auction() {
        let (storage, _temp_db) = setup_storage().await;

        let settler = Address::repeat_byte(0x77);
        // Reward item 10 was minted by the settlement of auction 9.
        insert_item(&storage, 10).await;
        storage
            .insert_settlement(&SettlementRecord {
                item_id: 9,
                meta: EventMeta {
                    block_number: 480,
                    log_index: 3,
                    tx_hash: B256::repeat_byte(0x09),
                    block_timestamp: 1_700_000_480,
                },
                settler: Some(settler),
            })
            .await
            .unwrap();

        let resolver = SettlementResolver::new(storage.clone(), None::<FakeLookup>, &config());
        assert_eq!(resolver.resolve_pending().await.unwrap(), 1);

        let item = storage.get_item(10).await.unwrap().unwrap();
        assert_eq!(item.settled_by, Some(settler));

        storage.close().await;
    }
}
