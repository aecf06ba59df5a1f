//! RPC provider wrapper for Ethereum communication.

use std::collections::HashMap;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter, Log};
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use tracing::warn;

use super::events::{decode_payload, meta_from_log, ChainEvent, ChainPayload};
use crate::config::ContractsConfig;

/// HTTP RPC provider for querying Ethereum.
#[derive(Clone)]
pub struct RpcProvider {
    provider: RootProvider<Http<Client>>,
    addresses: Vec<Address>,
}

impl RpcProvider {
    /// Create a new RPC provider watching all protocol contracts.
    pub async fn new(rpc_url: &str, contracts: &ContractsConfig) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;

        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self {
            provider,
            addresses: vec![
                contracts.token,
                contracts.auction_house,
                contracts.governor,
                contracts.data_proxy,
                contracts.rewards,
                contracts.treasury,
            ],
        })
    }

    /// Get the latest block number.
    pub async fn get_block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .context("Failed to get block number")
    }

    /// Get the chain id.
    pub async fn get_chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .context("Failed to get chain id")
    }

    /// Get a block's hash, or zero if the block is unknown.
    pub async fn get_block_hash(&self, block_number: u64) -> Result<B256> {
        let block = self
            .provider
            .get_block_by_number(
                BlockNumberOrTag::Number(block_number),
                BlockTransactionsKind::Hashes,
            )
            .await
            .with_context(|| format!("Failed to fetch block {}", block_number))?;

        Ok(block.map(|b| b.header.hash).unwrap_or(B256::ZERO))
    }

    /// The transaction sender, used to attribute settlements to the
    /// account that paid for the settling transaction.
    pub async fn get_tx_sender(&self, tx_hash: B256) -> Result<Option<Address>> {
        let tx = self
            .provider
            .get_transaction_by_hash(tx_hash)
            .await
            .with_context(|| format!("Failed to fetch transaction {:#x}", tx_hash))?;

        Ok(tx.map(|tx| tx.from))
    }

    /// Fetch and decode protocol events for a block range.
    ///
    /// Logs with unrecognized topics are dropped silently; recognized
    /// topics that fail to decode are logged and skipped so one bad log
    /// cannot stall the stream. The result is sorted by chain order.
    pub async fn get_events(&self, from_block: u64, to_block: u64) -> Result<Vec<ChainEvent>> {
        let filter = Filter::new()
            .address(self.addresses.clone())
            .from_block(from_block)
            .to_block(to_block);

        let logs: Vec<Log> = self
            .provider
            .get_logs(&filter)
            .await
            .context("Failed to fetch logs from RPC")?;

        // Blocks repeat across logs in a batch; resolve each timestamp once.
        let mut timestamps: HashMap<u64, i64> = HashMap::new();
        let mut events = Vec::new();

        for log in &logs {
            let payload = match decode_payload(log) {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Failed to decode log: {}", e);
                    continue;
                }
            };

            let Some(block_number) = log.block_number else {
                warn!("Skipping log without block number");
                continue;
            };

            let block_timestamp = match timestamps.get(&block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = self.get_block_timestamp(block_number).await?;
                    timestamps.insert(block_number, ts);
                    ts
                }
            };

            let meta = meta_from_log(log, block_timestamp)?;
            let payload = self.enrich(meta.tx_hash, payload).await;

            events.push(ChainEvent { meta, payload });
        }

        events.sort_by_key(|e| (e.meta.block_number, e.meta.log_index));

        Ok(events)
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<i64> {
        let block = self
            .provider
            .get_block_by_number(
                BlockNumberOrTag::Number(block_number),
                BlockTransactionsKind::Hashes,
            )
            .await
            .with_context(|| format!("Failed to fetch block {}", block_number))?
            .with_context(|| format!("Block {} not found", block_number))?;

        Ok(block.header.timestamp as i64)
    }

    /// Attach the transaction sender to settlement events. A failed
    /// lookup leaves the settler unset for the resolver to backfill.
    async fn enrich(&self, tx_hash: B256, payload: ChainPayload) -> ChainPayload {
        match payload {
            ChainPayload::AuctionSettled {
                item_id,
                winner,
                amount,
                settler: None,
            } => {
                let settler = match self.get_tx_sender(tx_hash).await {
                    Ok(sender) => sender,
                    Err(e) => {
                        warn!("Failed to fetch settler for item {}: {}", item_id, e);
                        None
                    }
                };
                ChainPayload::AuctionSettled {
                    item_id,
                    winner,
                    amount,
                    settler,
                }
            }
            other => other,
        }
    }
}
