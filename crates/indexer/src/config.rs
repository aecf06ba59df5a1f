//! Configuration management for the Gavel indexer.
//!
//! Configuration is loaded from a TOML file. Values of the form
//! `${VAR_NAME}` are expanded from the environment before parsing, except
//! inside comments.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network configuration
    pub network: NetworkConfig,

    /// Protocol contract addresses
    pub contracts: ContractsConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Resolver configuration (settlement attribution, rewards, names)
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Ethereum RPC URL
    pub rpc_url: String,

    /// Chain ID (1 for mainnet)
    pub chain_id: u64,
}

/// Protocol contract addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// Item token contract (ItemCreated, Transfer, delegation events)
    pub token: Address,

    /// Auction house contract (AuctionCreated/Bid/Extended/Settled)
    pub auction_house: Address,

    /// Governor contract (proposals and votes)
    pub governor: Address,

    /// Data proxy contract (candidates, signatures, feedback)
    pub data_proxy: Address,

    /// Client rewards contract (registrations and balance reads)
    pub rewards: Address,

    /// Treasury contract (ETH flows)
    pub treasury: Address,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://gavel.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Block number to start syncing from (0 = from genesis)
    #[serde(default)]
    pub start_block: u64,

    /// Polling interval in seconds for new blocks
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Batch size for historical sync (number of blocks per batch)
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Number of confirmations to wait before processing blocks
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            confirmations: default_confirmations(),
        }
    }
}

/// Resolver configuration.
///
/// Covers the settlement-attribution fallback endpoint, the name
/// resolution endpoint, and the periodic refresh cadence shared by the
/// settlement and rewards services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// External settlement lookup endpoint (optional; local settlement
    /// rows are always preferred)
    #[serde(default)]
    pub settlement_endpoint: Option<String>,

    /// Name resolution endpoint (optional; names stay unresolved without it)
    #[serde(default)]
    pub name_endpoint: Option<String>,

    /// Maximum concurrent outbound lookups
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// HTTP timeout for outbound lookups in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// In-memory name cache capacity (entries)
    #[serde(default = "default_name_cache_capacity")]
    pub name_cache_capacity: usize,

    /// Name cache TTL in seconds; both cache tiers treat older entries
    /// as misses
    #[serde(default = "default_name_ttl_secs")]
    pub name_ttl_secs: u64,

    /// Interval between settlement/rewards refresh passes in seconds.
    ///
    /// **Must be > 0** - zero panics in tokio::time::interval.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            settlement_endpoint: None,
            name_endpoint: None,
            max_concurrency: default_max_concurrency(),
            timeout_secs: default_timeout_secs(),
            name_cache_capacity: default_name_cache_capacity(),
            name_ttl_secs: default_name_ttl_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_poll_interval_secs() -> u64 {
    12
}

fn default_batch_size() -> u64 {
    1000
}

fn default_confirmations() -> u64 {
    6
}

fn default_max_concurrency() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    3
}

fn default_name_cache_capacity() -> usize {
    10_000
}

fn default_name_ttl_secs() -> u64 {
    86_400 // 24 hours
}

fn default_refresh_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables can be referenced using `${VAR_NAME}` syntax.
    /// For example: `rpc_url = "${GAVEL_RPC_URL}"`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = Self::expand_env_vars(&contents)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_url.is_empty() {
            anyhow::bail!("Network RPC URL cannot be empty");
        }
        if self.network.chain_id == 0 {
            anyhow::bail!("Chain ID must be non-zero");
        }

        for (name, address) in [
            ("token", self.contracts.token),
            ("auction_house", self.contracts.auction_house),
            ("governor", self.contracts.governor),
            ("data_proxy", self.contracts.data_proxy),
            ("rewards", self.contracts.rewards),
            ("treasury", self.contracts.treasury),
        ] {
            if address.is_zero() {
                anyhow::bail!("Contracts {} must be a non-zero address", name);
            }
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.sync.poll_interval_secs == 0 {
            anyhow::bail!("Sync poll_interval_secs must be > 0");
        }
        if self.sync.batch_size == 0 {
            anyhow::bail!("Sync batch_size must be > 0");
        }

        if self.resolver.max_concurrency == 0 {
            anyhow::bail!("Resolver max_concurrency must be > 0");
        }
        if self.resolver.timeout_secs == 0 {
            anyhow::bail!("Resolver timeout_secs must be > 0");
        }
        if self.resolver.name_cache_capacity == 0 {
            anyhow::bail!("Resolver name_cache_capacity must be > 0");
        }
        if self.resolver.name_ttl_secs == 0 {
            anyhow::bail!("Resolver name_ttl_secs must be > 0");
        }
        if self.resolver.refresh_interval_secs == 0 {
            anyhow::bail!(
                "Resolver refresh_interval_secs must be > 0 (tokio interval cannot be zero)"
            );
        }

        for (name, endpoint) in [
            ("settlement_endpoint", &self.resolver.settlement_endpoint),
            ("name_endpoint", &self.resolver.name_endpoint),
        ] {
            if let Some(endpoint) = endpoint {
                let endpoint = endpoint.trim();
                if endpoint.is_empty() {
                    anyhow::bail!("Resolver {} cannot be empty when provided", name);
                }
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    anyhow::bail!("Resolver {} must be an http(s) URL", name);
                }
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }

    /// Expand environment variables in the format `${VAR_NAME}`.
    ///
    /// Placeholders inside comments (after `#` outside a string) are left
    /// untouched so example lines in config templates stay inert.
    ///
    /// # Errors
    /// Returns an error if a referenced environment variable is not set,
    /// or a placeholder is malformed.
    fn expand_env_vars(input: &str) -> Result<String> {
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        let mut in_string = false;
        let mut in_comment = false;

        while let Some(ch) = chars.next() {
            match ch {
                '\n' => {
                    in_comment = false;
                    result.push(ch);
                }
                '"' if !in_comment => {
                    in_string = !in_string;
                    result.push(ch);
                }
                '#' if !in_string && !in_comment => {
                    in_comment = true;
                    result.push(ch);
                }
                '$' if !in_comment && chars.peek() == Some(&'{') => {
                    chars.next(); // consume '{'

                    let mut var_name = String::new();
                    let mut found_close = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            found_close = true;
                            break;
                        }
                        var_name.push(c);
                    }

                    if !found_close {
                        anyhow::bail!("Unclosed environment variable placeholder");
                    }
                    if var_name.is_empty() {
                        anyhow::bail!("Empty environment variable name");
                    }

                    let value = std::env::var(&var_name).with_context(|| {
                        format!("Environment variable '{}' is not set", var_name)
                    })?;
                    result.push_str(&value);
                }
                _ => result.push(ch),
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // set_var/remove_var mutate process-wide state; the tests that touch
    // the environment take this lock so the parallel runner cannot
    // interleave them.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    const BASE_TOML: &str = r#"
[network]
rpc_url = "http://localhost:8545"
chain_id = 1

[contracts]
token = "0x1111111111111111111111111111111111111111"
auction_house = "0x2222222222222222222222222222222222222222"
governor = "0x3333333333333333333333333333333333333333"
data_proxy = "0x4444444444444444444444444444444444444444"
rewards = "0x5555555555555555555555555555555555555555"
treasury = "0x6666666666666666666666666666666666666666"

[database]
url = "sqlite://gavel.db"
"#;

    #[test]
    fn test_load_minimal_config() {
        let config = Config::from_toml_str(BASE_TOML).unwrap();
        assert_eq!(config.network.chain_id, 1);
        assert_eq!(config.database.url, "sqlite://gavel.db");
    }

    #[test]
    fn test_default_values() {
        let config = Config::from_toml_str(BASE_TOML).unwrap();

        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.sync.poll_interval_secs, 12);
        assert_eq!(config.sync.batch_size, 1000);
        assert_eq!(config.sync.confirmations, 6);
        assert_eq!(config.resolver.max_concurrency, 10);
        assert_eq!(config.resolver.timeout_secs, 3);
        assert_eq!(config.resolver.name_cache_capacity, 10_000);
        assert_eq!(config.resolver.name_ttl_secs, 86_400);
        assert_eq!(config.resolver.refresh_interval_secs, 300);
        assert!(config.resolver.settlement_endpoint.is_none());
        assert!(config.resolver.name_endpoint.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_validation_empty_rpc_url() {
        let toml = BASE_TOML.replace("http://localhost:8545", "");
        let result = Config::from_toml_str(&toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("RPC URL"));
    }

    #[test]
    fn test_validation_zero_contract_address() {
        let toml = BASE_TOML.replace(
            "0x2222222222222222222222222222222222222222",
            "0x0000000000000000000000000000000000000000",
        );
        let result = Config::from_toml_str(&toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("auction_house"));
    }

    #[test]
    fn test_validation_bad_resolver_endpoint() {
        let toml = format!(
            "{}\n[resolver]\nname_endpoint = \"ftp://names.example.com\"\n",
            BASE_TOML
        );
        let result = Config::from_toml_str(&toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("name_endpoint"));
    }

    #[test]
    fn test_validation_zero_refresh_interval() {
        let toml = format!("{}\n[resolver]\nrefresh_interval_secs = 0\n", BASE_TOML);
        let result = Config::from_toml_str(&toml);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("refresh_interval_secs"));
    }

    #[test]
    fn test_expand_env_vars() {
        let _env = ENV_LOCK.lock().unwrap();
        std::env::set_var("GAVEL_TEST_VAR", "hello");
        let result = Config::expand_env_vars("value is ${GAVEL_TEST_VAR}").unwrap();
        assert_eq!(result, "value is hello");

        let result = Config::expand_env_vars("no variables here").unwrap();
        assert_eq!(result, "no variables here");

        std::env::remove_var("GAVEL_TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_undefined() {
        let _env = ENV_LOCK.lock().unwrap();
        let result = Config::expand_env_vars("value is ${GAVEL_UNDEFINED_VAR_12345}");
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("GAVEL_UNDEFINED_VAR_12345"));
    }

    #[test]
    fn test_expand_env_vars_unclosed() {
        let result = Config::expand_env_vars("value is ${UNCLOSED");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Unclosed"));
    }

    #[test]
    fn test_expand_env_vars_ignores_comments() {
        let input = r#"
# Example: rpc_url = "${EXAMPLE_VAR}"
key = "value"
"#;
        let result = Config::expand_env_vars(input).unwrap();
        assert!(result.contains("${EXAMPLE_VAR}"));
        assert!(result.contains("key = \"value\""));
    }

    #[test]
    fn test_expand_env_vars_hash_in_string() {
        let _env = ENV_LOCK.lock().unwrap();
        std::env::set_var("GAVEL_URL_SUFFIX", "mytoken");

        // '#' inside a string is not a comment
        let input = r#"rpc_url = "https://example.com/#${GAVEL_URL_SUFFIX}""#;
        let result = Config::expand_env_vars(input).unwrap();
        assert!(result.contains("https://example.com/#mytoken"));

        std::env::remove_var("GAVEL_URL_SUFFIX");
    }

    #[test]
    fn test_config_with_env_vars() {
        let _env = ENV_LOCK.lock().unwrap();
        std::env::set_var("GAVEL_TEST_RPC", "https://mainnet.example.com");

        let toml = BASE_TOML.replace("http://localhost:8545", "${GAVEL_TEST_RPC}");
        let expanded = Config::expand_env_vars(&toml).unwrap();
        let config = Config::from_toml_str(&expanded).unwrap();
        assert_eq!(config.network.rpc_url, "https://mainnet.example.com");

        std::env::remove_var("GAVEL_TEST_RPC");
    }
}
