//! Reward aggregate service.
//!
//! Reward and withdrawal events land in the append-only ledger, but the
//! per-client totals shown to readers come from authoritative contract
//! reads: this service periodically queries the rewards contract and
//! overwrites the stored totals. Local arithmetic over the ledger never
//! feeds those columns, so a missed event cannot skew them.

use std::time::Duration;

use alloy::primitives::{Address, U256};
use alloy::providers::{ProviderBuilder, RootProvider};
use alloy::sol;
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use gavel_core::error::EngineError;
use tracing::{info, warn};

use crate::storage::Storage;

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract RewardsLedger {
        function clientBalance(uint32 clientId) external view returns (uint256);
        function clientTotalRewarded(uint32 clientId) external view returns (uint256);
        function clientBadge(uint32 clientId) external view returns (string);
    }
}

/// Authoritative totals read from the rewards contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTotals {
    /// Lifetime rewards granted (wei).
    pub total_rewarded: U256,

    /// Current withdrawable balance (wei).
    pub balance: U256,
}

impl ClientTotals {
    /// Lifetime withdrawals implied by the two on-chain values.
    pub fn total_withdrawn(&self) -> U256 {
        self.total_rewarded.saturating_sub(self.balance)
    }
}

/// Source of authoritative reward aggregates.
pub trait RewardsOracle {
    /// Read a client's lifetime rewards and current balance.
    fn totals(
        &self,
        client_id: u64,
    ) -> impl std::future::Future<Output = gavel_core::Result<ClientTotals>> + Send;

    /// Read a client's badge URI. Empty string means no badge.
    fn badge(
        &self,
        client_id: u64,
    ) -> impl std::future::Future<Output = gavel_core::Result<Option<String>>> + Send;
}

/// Rewards contract reader over HTTP RPC.
#[derive(Clone)]
pub struct OnchainRewardsOracle {
    contract: RewardsLedger::RewardsLedgerInstance<Http<Client>, RootProvider<Http<Client>>>,
}

impl OnchainRewardsOracle {
    /// Create an oracle bound to the rewards contract.
    pub fn new(rpc_url: &str, contract_address: Address) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;
        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self {
            contract: RewardsLedger::new(contract_address, provider),
        })
    }
}

impl RewardsOracle for OnchainRewardsOracle {
    async fn totals(&self, client_id: u64) -> gavel_core::Result<ClientTotals> {
        let id = u32::try_from(client_id).map_err(|_| EngineError::AggregateRead {
            client_id,
            message: "client id out of u32 range".to_string(),
        })?;

        let total_rewarded = self
            .contract
            .clientTotalRewarded(id)
            .call()
            .await
            .map_err(|e| EngineError::AggregateRead {
                client_id,
                message: e.to_string(),
            })?
            ._0;

        let balance = self
            .contract
            .clientBalance(id)
            .call()
            .await
            .map_err(|e| EngineError::AggregateRead {
                client_id,
                message: e.to_string(),
            })?
            ._0;

        Ok(ClientTotals {
            total_rewarded,
            balance,
        })
    }

    async fn badge(&self, client_id: u64) -> gavel_core::Result<Option<String>> {
        let id = u32::try_from(client_id).map_err(|_| EngineError::AggregateRead {
            client_id,
            message: "client id out of u32 range".to_string(),
        })?;

        let badge = self
            .contract
            .clientBadge(id)
            .call()
            .await
            .map_err(|e| EngineError::AggregateRead {
                client_id,
                message: e.to_string(),
            })?
            ._0;

        Ok(if badge.is_empty() { None } else { Some(badge) })
    }
}

/// Periodic refresher for client reward aggregates.
pub struct RewardsService<O> {
    storage: Storage,
    oracle: O,
    interval: Duration,
}

impl<O: RewardsOracle> RewardsService<O> {
    /// Create a service over the given oracle.
    pub fn new(storage: Storage, oracle: O, interval: Duration) -> Self {
        Self {
            storage,
            oracle,
            interval,
        }
    }

    /// Run the periodic refresh loop. Spawned as a background task.
    pub async fn run(&self) -> Result<()> {
        info!("Rewards service starting with interval: {:?}", self.interval);

        let mut interval = tokio::time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.refresh_all().await {
                warn!("Rewards refresh failed: {}", e);
            }
        }
    }

    /// Refresh every registered client once.
    ///
    /// Badges are fetched only for clients that do not have one stored
    /// yet; totals are re-read every pass.
    pub async fn refresh_all(&self) -> Result<usize> {
        let clients = self.storage.list_clients().await?;
        let mut refreshed = 0;

        for client in &clients {
            if self.refresh_client(client.id).await {
                refreshed += 1;
            }
            if client.badge_uri.is_none() {
                self.refresh_badge(client.id).await;
            }
        }

        Ok(refreshed)
    }

    /// Refresh one client's totals. A failed read keeps the previous
    /// stored values. Returns whether the totals were overwritten.
    pub async fn refresh_client(&self, client_id: u64) -> bool {
        let totals = match self.oracle.totals(client_id).await {
            Ok(totals) => totals,
            Err(e) => {
                warn!("Keeping stored totals for client {}: {}", client_id, e);
                return false;
            }
        };

        match self
            .storage
            .overwrite_client_totals(client_id, &totals.total_rewarded, &totals.total_withdrawn())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to store totals for client {}: {}", client_id, e);
                false
            }
        }
    }

    /// Refresh one client's badge URI, best effort.
    pub async fn refresh_badge(&self, client_id: u64) {
        match self.oracle.badge(client_id).await {
            Ok(badge) => {
                if let Err(e) = self
                    .storage
                    .set_client_badge(client_id, badge.as_deref())
                    .await
                {
                    warn!("Failed to store badge for client {}: {}", client_id, e);
                }
            }
            Err(e) => warn!("Keeping stored badge for client {}: {}", client_id, e),
        }
    }
}
