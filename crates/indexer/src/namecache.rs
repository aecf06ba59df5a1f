//! Three-tier address-to-name resolution cache.
//!
//! Lookups go memory, then database, then the remote resolver. Both
//! cache tiers share one TTL, and negative answers are cached like
//! positive ones so unknown addresses do not hammer the resolver.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use gavel_core::error::EngineError;
use lru::LruCache;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::storage::{NameRecord, Storage};

/// Rows of each read view whose names are kept warm per pass.
const WARM_VIEW_ROWS: u32 = 100;

/// Source of address-to-name resolutions.
pub trait NameResolver {
    /// Resolve an address. `Ok(None)` means the address has no name;
    /// that answer is cached too.
    fn resolve(
        &self,
        address: &Address,
    ) -> impl std::future::Future<Output = gavel_core::Result<Option<ResolvedName>>> + Send;
}

/// A successful remote resolution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResolvedName {
    /// The resolved display name.
    pub name: String,

    /// Avatar URI, when the resolver has one.
    #[serde(default)]
    pub avatar: Option<String>,
}

/// HTTP-backed name resolver.
pub struct HttpNameResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNameResolver {
    /// Create a resolver for the given endpoint.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build name resolver HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl NameResolver for HttpNameResolver {
    async fn resolve(&self, address: &Address) -> gavel_core::Result<Option<ResolvedName>> {
        let url = format!("{}/{:#x}", self.base_url, address);

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
                let body: ResolvedName = response
                    .json()
                    .await
                    .map_err(|e| EngineError::Decode(e.to_string()))?;
                Ok(Some(body))
            }
            status => Err(EngineError::TransientNetwork(format!(
                "Name endpoint returned {}",
                status
            ))),
        }
    }
}

/// The cache service. Shared across tasks by cloning the storage handle
/// and wrapping the service in an `Arc` at the call site.
pub struct NameService<R> {
    storage: Storage,
    resolver: Option<R>,
    memory: Mutex<LruCache<Address, NameRecord>>,
    ttl_secs: i64,
    max_concurrency: usize,
}

impl<R: NameResolver> NameService<R> {
    /// Create a service with the configured capacity and TTL.
    pub fn new(storage: Storage, resolver: Option<R>, config: &ResolverConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.name_cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            storage,
            resolver,
            memory: Mutex::new(LruCache::new(capacity)),
            ttl_secs: config.name_ttl_secs as i64,
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Run the periodic warm loop: resolve the addresses the read views
    /// surface so their `name_cache` joins have rows to hit.
    pub async fn run(&self, interval: Duration) -> Result<()> {
        if self.resolver.is_none() {
            info!("No name endpoint configured; name warming disabled");
            std::future::pending::<()>().await;
        }

        info!("Name service starting...");

        loop {
            match self.warm_view_names(WARM_VIEW_ROWS).await {
                Ok(named) => debug!("Name warm pass done, {} addresses named", named),
                Err(e) => warn!("Name warm pass failed: {}", e),
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// One warm pass over the top voters and recent auction winners.
    /// Returns how many addresses resolved to a name.
    pub async fn warm_view_names(&self, rows: u32) -> Result<usize> {
        let mut addresses: Vec<Address> = Vec::new();
        for ranked in self.storage.ranked_voters(rows).await? {
            addresses.push(ranked.voter.address);
        }
        for auction in self.storage.auction_history(rows).await? {
            if let Some(winner) = auction.winner {
                addresses.push(winner);
            }
        }

        if addresses.is_empty() {
            return Ok(0);
        }

        let resolved = self.resolve_batch(&addresses).await?;
        Ok(resolved.values().filter(|name| name.is_some()).count())
    }

    /// Resolve one address through the tiers.
    pub async fn resolve(&self, address: &Address) -> Result<Option<String>> {
        self.resolve_at(address, chrono::Utc::now().timestamp())
            .await
    }

    /// Resolve many addresses, deduplicated. The returned map has an
    /// entry for every input; a rate-limit answer stops further remote
    /// lookups and the rest fall back to whatever the caches hold.
    pub async fn resolve_batch(
        &self,
        addresses: &[Address],
    ) -> Result<HashMap<Address, Option<String>>> {
        let now = chrono::Utc::now().timestamp();
        let unique: Vec<Address> = addresses
            .iter()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let rate_limited = AtomicBool::new(false);

        let resolved: Vec<Result<(Address, Option<String>)>> = stream::iter(unique)
            .map(|address| {
                let rate_limited = &rate_limited;
                async move {
                    let name = if rate_limited.load(Ordering::SeqCst) {
                        self.cached_only(&address, now).await?
                    } else {
                        match self.resolve_inner(&address, now).await {
                            Ok(name) => name,
                            Err(EngineError::RateLimited) => {
                                warn!(
                                    "Name resolver rate limited; serving rest of batch from cache"
                                );
                                rate_limited.store(true, Ordering::SeqCst);
                                self.cached_only(&address, now).await?
                            }
                            Err(e) => {
                                debug!("Name resolution failed for {:#x}: {}", address, e);
                                self.cached_only(&address, now).await?
                            }
                        }
                    };
                    Ok((address, name))
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut results = HashMap::with_capacity(resolved.len());
        for entry in resolved {
            let (address, name) = entry?;
            results.insert(address, name);
        }

        Ok(results)
    }

    async fn resolve_at(&self, address: &Address, now: i64) -> Result<Option<String>> {
        match self.resolve_inner(address, now).await {
            Ok(name) => Ok(name),
            Err(EngineError::RateLimited) => self.cached_only(address, now).await,
            Err(e) => {
                debug!("Name resolution failed for {:#x}: {}", address, e);
                self.cached_only(address, now).await
            }
        }
    }

    async fn resolve_inner(
        &self,
        address: &Address,
        now: i64,
    ) -> std::result::Result<Option<String>, EngineError> {
        if let Some(record) = self.fresh_from_memory(address, now) {
            return Ok(record.name);
        }

        if let Some(record) = self
            .storage
            .get_cached_name(address)
            .await
            .map_err(|e| EngineError::TransientNetwork(e.to_string()))?
        {
            if self.is_fresh(&record, now) {
                self.remember(record.clone());
                return Ok(record.name);
            }
        }

        let Some(resolver) = &self.resolver else {
            return Ok(None);
        };

        let resolved = resolver.resolve(address).await?;
        let record = NameRecord {
            address: *address,
            name: resolved.as_ref().map(|r| r.name.clone()),
            avatar: resolved.and_then(|r| r.avatar),
            resolved_at: now,
        };

        self.storage
            .upsert_cached_name(&record)
            .await
            .map_err(|e| EngineError::TransientNetwork(e.to_string()))?;
        let name = record.name.clone();
        self.remember(record);

        Ok(name)
    }

    /// Serve from the caches without touching the resolver, ignoring the
    /// TTL. A stale answer beats none when the resolver is unavailable.
    async fn cached_only(&self, address: &Address, _now: i64) -> Result<Option<String>> {
        if let Some(record) = self.memory.lock().ok().and_then(|m| m.peek(address).cloned()) {
            return Ok(record.name);
        }

        Ok(self
            .storage
            .get_cached_name(address)
            .await?
            .and_then(|record| record.name))
    }

    /// Reads go through `peek` so a lookup does not refresh an entry's
    /// position; only writes do, and the tier evicts oldest-inserted
    /// first.
    fn fresh_from_memory(&self, address: &Address, now: i64) -> Option<NameRecord> {
        let memory = self.memory.lock().ok()?;
        let record = memory.peek(address)?;
        if now - record.resolved_at <= self.ttl_secs {
            Some(record.clone())
        } else {
            None
        }
    }

    fn is_fresh(&self, record: &NameRecord, now: i64) -> bool {
        now - record.resolved_at <= self.ttl_secs
    }

    fn remember(&self, record: NameRecord) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.put(record.address, record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::setup_storage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        answers: HashMap<Address, ResolvedName>,
        calls: AtomicUsize,
        rate_limited: bool,
    }

    impl CountingResolver {
        fn with(address: Address, name: &str) -> Self {
            let mut answers = HashMap::new();
            answers.insert(
                address,
                ResolvedName {
                    name: name.to_string(),
                    avatar: None,
                },
            );
            Self {
                answers,
                calls: AtomicUsize::new(0),
                rate_limited: false,
            }
        }

        fn empty() -> Self {
            Self {
                answers: HashMap::new(),
                calls: AtomicUsize::new(0),
                rate_limited: false,
            }
        }
    }

    impl NameResolver for CountingResolver {
        async fn resolve(&self, address: &Address) -> gavel_core::Result<Option<ResolvedName>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.rate_limited {
                return Err(EngineError::RateLimited);
            }
            Ok(self.answers.get(address).cloned())
        }
    }

    fn config() -> ResolverConfig {
        ResolverConfig {
            name_ttl_secs: 3600,
            ..ResolverConfig::default()
        }
    }

    #[tokio::test]
    async fn test_one_remote_call_per_ttl_window() {
        let (storage, _temp_db) = setup_storage().await;

        let address = Address::repeat_byte(0x51);
        let service = NameService::new(
            storage.clone(),
            Some(CountingResolver::with(address, "bidder.eth")),
            &config(),
        );

        // Repeated lookups inside the TTL hit the caches.
        for _ in 0..5 {
            let name = service.resolve_at(&address, 10_000).await.unwrap();
            assert_eq!(name.as_deref(), Some("bidder.eth"));
        }
        let resolver = service.resolver.as_ref().unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        // Past the TTL the resolver is consulted again.
        service.resolve_at(&address, 20_000).await.unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_negative_results_are_cached() {
        let (storage, _temp_db) = setup_storage().await;

        let address = Address::repeat_byte(0x52);
        let service = NameService::new(storage.clone(), Some(CountingResolver::empty()), &config());

        assert_eq!(service.resolve_at(&address, 1_000).await.unwrap(), None);
        assert_eq!(service.resolve_at(&address, 1_500).await.unwrap(), None);

        // The miss was cached; only one remote call happened.
        let resolver = service.resolver.as_ref().unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_database_tier_survives_memory_eviction() {
        let (storage, _temp_db) = setup_storage().await;

        let address = Address::repeat_byte(0x53);
        {
            let service = NameService::new(
                storage.clone(),
                Some(CountingResolver::with(address, "old.eth")),
                &config(),
            );
            service.resolve_at(&address, 2_000).await.unwrap();
        }

        // A fresh service has an empty memory tier but finds the row.
        let service = NameService::new(storage.clone(), Some(CountingResolver::empty()), &config());
        let name = service.resolve_at(&address, 2_500).await.unwrap();
        assert_eq!(name.as_deref(), Some("old.eth"));
        let resolver = service.resolver.as_ref().unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_rate_limit_falls_back_to_stale_cache() {
        let (storage, _temp_db) = setup_storage().await;

        let address = Address::repeat_byte(0x54);
        storage
            .upsert_cached_name(&NameRecord {
                address,
                name: Some("stale.eth".to_string()),
                avatar: None,
                resolved_at: 0,
            })
            .await
            .unwrap();

        let mut resolver = CountingResolver::empty();
        resolver.rate_limited = true;
        let service = NameService::new(storage.clone(), Some(resolver), &config());

        // Entry is far past the TTL, but a 429 answer keeps it in play.
        let name = service.resolve_at(&address, 1_000_000).await.unwrap();
        assert_eq!(name.as_deref(), Some("stale.eth"));

        storage.close().await;
    }

    #[tokio::test]
    async fn test_batch_returns_entry_for_every_input() {
        let (storage, _temp_db) = setup_storage().await;

        let known = Address::repeat_byte(0x55);
        let unknown = Address::repeat_byte(0x56);
        let service = NameService::new(
            storage.clone(),
            Some(CountingResolver::with(known, "known.eth")),
            &config(),
        );

        let results = service
            .resolve_batch(&[known, unknown, known])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[&known].as_deref(), Some("known.eth"));
        assert_eq!(results[&unknown], None);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_memory_tier_evicts_oldest_inserted_first() {
        let (storage, _temp_db) = setup_storage().await;

        let first = Address::repeat_byte(0x61);
        let second = Address::repeat_byte(0x62);
        let third = Address::repeat_byte(0x63);
        let mut resolver = CountingResolver::with(first, "first.eth");
        resolver.answers.insert(
            second,
            ResolvedName {
                name: "second.eth".to_string(),
                avatar: None,
            },
        );
        resolver.answers.insert(
            third,
            ResolvedName {
                name: "third.eth".to_string(),
                avatar: None,
            },
        );

        let cfg = ResolverConfig {
            name_cache_capacity: 2,
            ..config()
        };
        let service = NameService::new(storage.clone(), Some(resolver), &cfg);

        service.resolve_at(&first, 1_000).await.unwrap();
        service.resolve_at(&second, 1_001).await.unwrap();
        // Re-reading the oldest entry does not refresh its position.
        service.resolve_at(&first, 1_002).await.unwrap();
        service.resolve_at(&third, 1_003).await.unwrap();

        {
            let memory = service.memory.lock().unwrap();
            assert!(!memory.contains(&first));
            assert!(memory.contains(&second));
            assert!(memory.contains(&third));
        }

        storage.close().await;
    }

    #[tokio::test]
    async fn test_warm_pass_fills_view_name_joins() {
        let (storage, _temp_db) = setup_storage().await;

        let winner = Address::repeat_byte(0x58);
        storage
            .insert_auction(&crate::storage::AuctionRecord {
                item_id: 4,
                start_time: 0,
                end_time: 100,
                winner: None,
                amount: None,
                settled: false,
                client_id: None,
            })
            .await
            .unwrap();
        storage
            .settle_auction(4, &winner, &alloy::primitives::U256::from(900))
            .await
            .unwrap();

        let service = NameService::new(
            storage.clone(),
            Some(CountingResolver::with(winner, "winner.eth")),
            &config(),
        );

        let named = service.warm_view_names(10).await.unwrap();
        assert_eq!(named, 1);

        // The auction history join now carries the resolved name.
        let history = storage.auction_history(10).await.unwrap();
        assert_eq!(history[0].winner_name.as_deref(), Some("winner.eth"));

        storage.close().await;
    }
}
