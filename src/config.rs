use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::l1_client::L1Signer;
use crate::types::normalize_l1_id;

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub evm: EvmConfig,
    pub l1: L1Config,
    pub relayer: RelayerConfig,
    pub api: ApiConfig,
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// EVM configuration
#[derive(Clone)]
pub struct EvmConfig {
    pub rpc_url: String,
    /// WebSocket endpoint for the live log subscription
    pub ws_url: String,
    pub chain_id: u64,
    pub bridge_address: String,
    pub private_key: String,
    /// Blocks (inclusion block counted) before a mint counts as final
    pub confirmations: u32,
    /// First block to scan when no cursor has been persisted
    pub start_block: Option<u64>,
    /// Largest eth_getLogs range per backfill request
    pub max_block_range: u64,
    /// Consecutive subscription failures tolerated before giving up
    pub max_reconnect_attempts: u32,
}

/// Custom Debug that redacts the private key.
impl fmt::Debug for EvmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmConfig")
            .field("rpc_url", &self.rpc_url)
            .field("ws_url", &self.ws_url)
            .field("chain_id", &self.chain_id)
            .field("bridge_address", &self.bridge_address)
            .field("private_key", &"<redacted>")
            .field("confirmations", &self.confirmations)
            .field("start_block", &self.start_block)
            .field("max_block_range", &self.max_block_range)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .finish()
    }
}

/// L1 configuration
#[derive(Clone)]
pub struct L1Config {
    pub rpc_url: String,
    pub package_id: String,
    pub bridge_object_id: String,
    pub signer_key: String,
    /// Table of processed EVM nonces, checked before every unlock retry
    pub processed_nonces_table_id: String,
    pub gas_budget: u64,
    pub poll_interval_ms: u64,
    pub error_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub page_size: usize,
}

/// Custom Debug that redacts the signer key.
impl fmt::Debug for L1Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("L1Config")
            .field("rpc_url", &self.rpc_url)
            .field("package_id", &self.package_id)
            .field("bridge_object_id", &self.bridge_object_id)
            .field("signer_key", &"<redacted>")
            .field("processed_nonces_table_id", &self.processed_nonces_table_id)
            .field("gas_budget", &self.gas_budget)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("error_backoff_ms", &self.error_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub max_concurrent_submissions: usize,
    pub submit_max_attempts: u32,
    pub submit_backoff_ms: u64,
    pub finality_poll_ms: u64,
    pub finality_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl RelayerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_submissions: 4,
            submit_max_attempts: 3,
            submit_backoff_ms: 2000,
            finality_poll_ms: 3000,
            finality_timeout_secs: 600,
            shutdown_timeout_secs: 30,
        }
    }
}

/// HTTP API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_address: String,
}

fn default_evm_confirmations() -> u32 {
    1
}

fn default_max_block_range() -> u64 {
    2000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_gas_budget() -> u64 {
    50_000_000
}

fn default_l1_poll_interval() -> u64 {
    5000
}

fn default_l1_error_backoff() -> u64 {
    10_000
}

fn default_l1_max_backoff() -> u64 {
    60_000
}

/// Upper bound the L1 node accepts for one query page
const MAX_L1_PAGE_SIZE: usize = 50;

fn default_api_bind_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| eyre!("{} environment variable is required", name))
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .wrap_err_with(|| format!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: required("DATABASE_URL")?,
        };

        let evm = EvmConfig {
            rpc_url: required("EVM_RPC_URL")?,
            ws_url: required("EVM_WS_URL")?,
            chain_id: required("EVM_CHAIN_ID")?
                .parse()
                .wrap_err("EVM_CHAIN_ID must be a valid u64")?,
            bridge_address: required("EVM_BRIDGE_ADDRESS")?,
            private_key: required("EVM_PRIVATE_KEY")?,
            confirmations: parsed_or("EVM_CONFIRMATIONS", default_evm_confirmations())?,
            start_block: env::var("EVM_START_BLOCK")
                .ok()
                .map(|v| v.trim().parse::<u64>())
                .transpose()
                .wrap_err("EVM_START_BLOCK must be a valid u64")?,
            max_block_range: parsed_or("EVM_MAX_BLOCK_RANGE", default_max_block_range())?,
            max_reconnect_attempts: parsed_or(
                "EVM_MAX_RECONNECT_ATTEMPTS",
                default_max_reconnect_attempts(),
            )?,
        };

        let l1 = L1Config {
            rpc_url: required("L1_RPC_URL")?,
            package_id: required("L1_PACKAGE_ID")?,
            bridge_object_id: required("L1_BRIDGE_OBJECT_ID")?,
            signer_key: required("L1_SIGNER_KEY")?,
            processed_nonces_table_id: required("L1_PROCESSED_NONCES_TABLE_ID")?,
            gas_budget: parsed_or("L1_GAS_BUDGET", default_gas_budget())?,
            poll_interval_ms: parsed_or("L1_POLL_INTERVAL_MS", default_l1_poll_interval())?,
            error_backoff_ms: parsed_or("L1_ERROR_BACKOFF_MS", default_l1_error_backoff())?,
            max_backoff_ms: parsed_or("L1_MAX_BACKOFF_MS", default_l1_max_backoff())?,
            page_size: parsed_or("L1_PAGE_SIZE", MAX_L1_PAGE_SIZE)?,
        };

        let defaults = RelayerConfig::default();
        let relayer = RelayerConfig {
            max_concurrent_submissions: parsed_or(
                "RELAYER_MAX_CONCURRENT_SUBMISSIONS",
                defaults.max_concurrent_submissions,
            )?,
            submit_max_attempts: parsed_or(
                "RELAYER_SUBMIT_MAX_ATTEMPTS",
                defaults.submit_max_attempts,
            )?,
            submit_backoff_ms: parsed_or("RELAYER_SUBMIT_BACKOFF_MS", defaults.submit_backoff_ms)?,
            finality_poll_ms: parsed_or("RELAYER_FINALITY_POLL_MS", defaults.finality_poll_ms)?,
            finality_timeout_secs: parsed_or(
                "RELAYER_FINALITY_TIMEOUT_SECS",
                defaults.finality_timeout_secs,
            )?,
            shutdown_timeout_secs: parsed_or(
                "RELAYER_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout_secs,
            )?,
        };

        let api = ApiConfig {
            bind_address: env::var("API_BIND_ADDRESS").unwrap_or_else(|_| default_api_bind_address()),
        };

        let config = Config {
            database,
            evm,
            l1,
            relayer,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        // EVM
        if self.evm.rpc_url.is_empty() {
            return Err(eyre!("evm.rpc_url cannot be empty"));
        }
        if !(self.evm.ws_url.starts_with("ws://") || self.evm.ws_url.starts_with("wss://")) {
            return Err(eyre!("evm.ws_url must be a ws:// or wss:// URL"));
        }
        if self.evm.bridge_address.len() != 42 || !self.evm.bridge_address.starts_with("0x") {
            return Err(eyre!(
                "evm.bridge_address must be a valid hex address (42 chars with 0x prefix)"
            ));
        }
        if self.evm.private_key.len() != 66 || !self.evm.private_key.starts_with("0x") {
            return Err(eyre!("evm.private_key must be 66 chars (0x + 64 hex chars)"));
        }
        if self.evm.confirmations == 0 {
            return Err(eyre!("evm.confirmations must be at least 1"));
        }
        if self.evm.max_block_range == 0 {
            return Err(eyre!("evm.max_block_range must be at least 1"));
        }

        // L1
        if self.l1.rpc_url.is_empty() {
            return Err(eyre!("l1.rpc_url cannot be empty"));
        }
        if normalize_l1_id(&self.l1.package_id).is_none() {
            return Err(eyre!("l1.package_id must be a hex object id"));
        }
        if normalize_l1_id(&self.l1.bridge_object_id).is_none() {
            return Err(eyre!("l1.bridge_object_id must be a hex object id"));
        }
        if normalize_l1_id(&self.l1.processed_nonces_table_id).is_none() {
            return Err(eyre!("l1.processed_nonces_table_id must be a hex object id"));
        }
        L1Signer::from_encoded(&self.l1.signer_key).wrap_err("l1.signer_key is invalid")?;
        if self.l1.page_size == 0 || self.l1.page_size > MAX_L1_PAGE_SIZE {
            return Err(eyre!(
                "l1.page_size must be between 1 and {}",
                MAX_L1_PAGE_SIZE
            ));
        }
        if self.l1.error_backoff_ms > self.l1.max_backoff_ms {
            return Err(eyre!("l1.error_backoff_ms cannot exceed l1.max_backoff_ms"));
        }

        // Coordinator
        if self.relayer.max_concurrent_submissions == 0 {
            return Err(eyre!("relayer.max_concurrent_submissions must be at least 1"));
        }
        if self.relayer.submit_max_attempts == 0 {
            return Err(eyre!("relayer.submit_max_attempts must be at least 1"));
        }
        if self.relayer.finality_poll_ms == 0 {
            return Err(eyre!("relayer.finality_poll_ms must be at least 1"));
        }

        Ok(())
    }
}
