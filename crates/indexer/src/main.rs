//! Gavel indexer - protocol event materialization
//!
//! This binary provides:
//! - Event ingestion from the protocol contracts (token, auction house,
//!   governor, data proxy, rewards, treasury)
//! - Idempotent materialization into SQLite
//! - Settlement attribution backfill
//! - Authoritative reward aggregate refresh
//! - Display-name warming for the read views

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use gavel_indexer::handlers::Dispatcher;
use gavel_indexer::listener::{RpcProvider, SyncEngine};
use gavel_indexer::namecache::{HttpNameResolver, NameService};
use gavel_indexer::rewards::{OnchainRewardsOracle, RewardsService};
use gavel_indexer::settlement::{LogIndexClient, SettlementResolver};

#[derive(Parser)]
#[command(name = "gavel-indexer")]
#[command(version, about = "Materializes protocol events into a relational store", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "gavel.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the indexer service (sync + background services)
    Run,

    /// Show indexer status and sync progress
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://gavel.db")]
        database_url: String,
    },

    /// Re-process a historical block range through the idempotent store
    Backfill {
        /// First block of the range
        #[arg(long)]
        from: u64,

        /// Last block of the range (inclusive)
        #[arg(long)]
        to: u64,
    },

    /// Run one settlement attribution sweep and exit
    ResolveSettlements,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug)?;

    info!("Gavel indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_indexer(&cli.config).await?,
        Commands::Status => show_status(&cli.config).await?,
        Commands::InitDb { database_url } => init_database(&database_url).await?,
        Commands::Backfill { from, to } => backfill(&cli.config, from, to).await?,
        Commands::ResolveSettlements => resolve_settlements(&cli.config).await?,
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("gavel_indexer=debug,sqlx=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gavel_indexer=info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_line_number(true))
        .init();

    Ok(())
}

async fn open_storage(
    config: &gavel_indexer::config::Config,
) -> Result<gavel_indexer::storage::Storage> {
    let storage = gavel_indexer::storage::Storage::new(
        &config.database.url,
        Some(config.database.max_connections),
        Some(config.database.min_connections),
    )
    .await
    .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    Ok(storage)
}

/// Main indexer service - event sync plus the periodic backfill services
async fn run_indexer(config_path: &str) -> Result<()> {
    use gavel_indexer::config::Config;

    info!("Starting indexer service with config: {}", config_path);

    let config = Config::from_file(config_path).context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  Chain ID: {}", config.network.chain_id);
    info!("  RPC URL: {}", config.network.rpc_url);
    info!("  Database: {}", config.database.url);
    info!("  Start block: {}", config.sync.start_block);

    let storage = open_storage(&config).await?;
    info!("Database initialized");

    // Initialize sync state if this is a fresh database. The cursor is
    // set to (start_block - 1) so the first range begins at start_block.
    let sync_state = storage.get_sync_state().await?;
    if sync_state.last_block_number == 0 && sync_state.chain_id == 0 {
        let initial_block = config.sync.start_block.saturating_sub(1);
        info!(
            "Fresh database detected, initializing sync state with chain_id={} initial_block={}",
            config.network.chain_id, initial_block
        );
        storage
            .initialize_sync_state(
                config.network.chain_id,
                initial_block,
                alloy::primitives::B256::ZERO,
            )
            .await
            .context("Failed to initialize sync state")?;
    } else {
        info!(
            "Existing sync state found: chain_id={} last_block={}",
            sync_state.chain_id, sync_state.last_block_number
        );
    }

    let provider = RpcProvider::new(&config.network.rpc_url, &config.contracts)
        .await
        .context("Failed to create RPC provider")?;

    info!("RPC provider initialized");

    let oracle = OnchainRewardsOracle::new(&config.network.rpc_url, config.contracts.rewards)
        .context("Failed to create rewards oracle")?;

    let dispatcher = Dispatcher::with_oracle(storage.clone(), oracle.clone());
    let sync_engine = SyncEngine::new(provider, storage.clone(), dispatcher, config.sync.clone());

    let sync_handle = tokio::spawn(async move { sync_engine.run().await });
    info!("Event listener started");

    let refresh_interval = std::time::Duration::from_secs(config.resolver.refresh_interval_secs);
    let lookup_timeout = std::time::Duration::from_secs(config.resolver.timeout_secs);

    let settlement_lookup = config
        .resolver
        .settlement_endpoint
        .as_deref()
        .map(|endpoint| LogIndexClient::new(endpoint, lookup_timeout))
        .transpose()
        .context("Failed to create settlement lookup client")?;

    let settlement_resolver =
        SettlementResolver::new(storage.clone(), settlement_lookup, &config.resolver);
    let settlement_handle = tokio::spawn(async move { settlement_resolver.run().await });
    info!(
        "Settlement resolver started (interval: {}s)",
        config.resolver.refresh_interval_secs
    );

    let rewards_service = RewardsService::new(storage.clone(), oracle, refresh_interval);
    let rewards_handle = tokio::spawn(async move { rewards_service.run().await });
    info!(
        "Rewards service started (interval: {}s)",
        config.resolver.refresh_interval_secs
    );

    let name_resolver = config
        .resolver
        .name_endpoint
        .as_deref()
        .map(|endpoint| HttpNameResolver::new(endpoint, lookup_timeout))
        .transpose()
        .context("Failed to create name resolver client")?;

    let name_service = NameService::new(storage.clone(), name_resolver, &config.resolver);
    let name_handle = tokio::spawn(async move { name_service.run(refresh_interval).await });
    if config.resolver.name_endpoint.is_some() {
        info!(
            "Name service started (interval: {}s)",
            config.resolver.refresh_interval_secs
        );
    }

    info!("Indexer is running. Press Ctrl+C to stop.");

    tokio::select! {
        result = sync_handle => {
            storage.close().await;
            match result {
                Ok(Ok(())) => {
                    warn!("Sync engine exited unexpectedly");
                    Ok(())
                }
                Ok(Err(e)) => Err(e).context("Sync engine failed"),
                Err(e) => Err(anyhow::anyhow!("Sync task panicked: {}", e)),
            }
        }
        result = settlement_handle => {
            storage.close().await;
            match result {
                Ok(Ok(())) => {
                    warn!("Settlement resolver exited unexpectedly");
                    Ok(())
                }
                Ok(Err(e)) => Err(e).context("Settlement resolver failed"),
                Err(e) => Err(anyhow::anyhow!("Settlement task panicked: {}", e)),
            }
        }
        result = rewards_handle => {
            storage.close().await;
            match result {
                Ok(Ok(())) => {
                    warn!("Rewards service exited unexpectedly");
                    Ok(())
                }
                Ok(Err(e)) => Err(e).context("Rewards service failed"),
                Err(e) => Err(anyhow::anyhow!("Rewards task panicked: {}", e)),
            }
        }
        result = name_handle => {
            storage.close().await;
            match result {
                Ok(Ok(())) => {
                    warn!("Name service exited unexpectedly");
                    Ok(())
                }
                Ok(Err(e)) => Err(e).context("Name service failed"),
                Err(e) => Err(anyhow::anyhow!("Name service task panicked: {}", e)),
            }
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received shutdown signal, gracefully shutting down...");
            storage.close().await;
            Ok(())
        }
    }
}

/// Show indexer status and sync progress
async fn show_status(config_path: &str) -> Result<()> {
    use gavel_indexer::config::Config;

    info!("Checking indexer status");

    let config = Config::from_file(config_path).context("Failed to load configuration")?;
    let storage = open_storage(&config).await?;

    let sync_state = storage.get_sync_state().await?;
    let stats = storage.stats().await?;
    let treasury = storage.treasury_totals().await?;

    println!("\n=== Gavel Indexer Status ===\n");
    println!("Sync Progress:");
    println!("  Chain ID: {}", sync_state.chain_id);
    println!("  Last Block: {}", sync_state.last_block_number);
    println!("  Last Block Hash: {:#x}", sync_state.last_block_hash);
    println!(
        "  Last Updated: {}",
        chrono::DateTime::from_timestamp(sync_state.updated_at, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string())
    );

    println!("\nDatabase Statistics:");
    println!("  Items: {}", stats.item_count);
    println!("  Auctions: {}", stats.auction_count);
    println!("  Proposals: {}", stats.proposal_count);
    println!("  Votes: {}", stats.vote_count);
    println!("  Clients: {}", stats.client_count);

    println!("\nTreasury:");
    println!("  Total In: {} wei", treasury.total_in);
    println!("  Total Out: {} wei", treasury.total_out);
    println!("  Balance: {} wei", treasury.balance());

    println!();

    storage.close().await;

    Ok(())
}

/// Initialize the database
async fn init_database(database_url: &str) -> Result<()> {
    use gavel_indexer::storage::Storage;

    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, None, None)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Items: {}", stats.item_count);
    info!("  Proposals: {}", stats.proposal_count);
    info!("  Last block: {}", stats.last_block_number);

    storage.close().await;

    Ok(())
}

/// Re-process a historical range. Safe to run against a live database:
/// every handler is idempotent, so replays converge.
async fn backfill(config_path: &str, from: u64, to: u64) -> Result<()> {
    use gavel_indexer::config::Config;

    anyhow::ensure!(from <= to, "--from must not exceed --to");

    let config = Config::from_file(config_path).context("Failed to load configuration")?;
    let storage = open_storage(&config).await?;

    let provider = RpcProvider::new(&config.network.rpc_url, &config.contracts)
        .await
        .context("Failed to create RPC provider")?;

    let oracle = OnchainRewardsOracle::new(&config.network.rpc_url, config.contracts.rewards)
        .context("Failed to create rewards oracle")?;
    let dispatcher = Dispatcher::with_oracle(storage.clone(), oracle);

    info!("Backfilling blocks {} to {}", from, to);

    let events = provider
        .get_events(from, to)
        .await
        .with_context(|| format!("Failed to fetch events for blocks {} to {}", from, to))?;

    info!("Found {} protocol events", events.len());

    for event in &events {
        dispatcher.apply(event).await.with_context(|| {
            format!(
                "Failed to apply event at block {} log {}",
                event.meta.block_number, event.meta.log_index
            )
        })?;
    }

    info!("Backfill complete");

    storage.close().await;

    Ok(())
}

/// Run one settlement attribution sweep and exit
async fn resolve_settlements(config_path: &str) -> Result<()> {
    use gavel_indexer::config::Config;

    let config = Config::from_file(config_path).context("Failed to load configuration")?;
    let storage = open_storage(&config).await?;

    let lookup_timeout = std::time::Duration::from_secs(config.resolver.timeout_secs);
    let settlement_lookup = config
        .resolver
        .settlement_endpoint
        .as_deref()
        .map(|endpoint| LogIndexClient::new(endpoint, lookup_timeout))
        .transpose()
        .context("Failed to create settlement lookup client")?;

    let resolver = SettlementResolver::new(storage.clone(), settlement_lookup, &config.resolver);

    let resolved = resolver.resolve_pending().await?;
    info!("Attributed {} items", resolved);

    storage.close().await;

    Ok(())
}
