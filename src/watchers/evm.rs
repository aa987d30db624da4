//! EVM watcher for bridge `BurnEvent` logs
//!
//! Subscribes to live logs first, then backfills from the persisted cursor to
//! the head observed at subscription time in `eth_getLogs` chunks, then
//! streams, skipping blocks the backfill already covered.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EvmConfig;
use crate::contracts::evm_bridge::EvmBridge;
use crate::coordinator::Coordinator;
use crate::error::RelayError;
use crate::metrics;
use crate::types::{BridgeEvent, BurnEvent, Cursor, Direction, EvmAddress, L1Address, RelayKey};
use crate::writers::RetryConfig;

const CHAIN: &str = "evm";

/// Source of bridge logs
#[async_trait]
pub trait EvmLogFeed: Send + Sync {
    async fn head_block(&self) -> Result<u64, RelayError>;

    /// Bridge burn logs in `[from, to]`, in chain order
    async fn logs_in_range(&self, from: u64, to: u64) -> Result<Vec<Log>, RelayError>;

    /// Live bridge burn logs. The stream ends when the connection drops.
    async fn subscribe(&self) -> Result<BoxStream<'static, Log>, RelayError>;
}

/// Log feed over an HTTP provider (head, backfill) and a WebSocket
/// subscription (live logs)
pub struct AlloyLogFeed {
    http: RootProvider<Http<Client>>,
    ws_url: String,
    bridge_address: Address,
}

impl AlloyLogFeed {
    pub fn new(config: &EvmConfig) -> Result<Self> {
        let url = config.rpc_url.parse().wrap_err("Failed to parse RPC URL")?;
        let http = ProviderBuilder::new().on_http(url);
        let bridge_address =
            Address::from_str(&config.bridge_address).wrap_err("Invalid bridge address")?;

        Ok(Self {
            http,
            ws_url: config.ws_url.clone(),
            bridge_address,
        })
    }

    fn filter(&self) -> Filter {
        Filter::new()
            .address(self.bridge_address)
            .event_signature(EvmBridge::BurnEvent::SIGNATURE_HASH)
    }
}

#[async_trait]
impl EvmLogFeed for AlloyLogFeed {
    async fn head_block(&self) -> Result<u64, RelayError> {
        self.http
            .get_block_number()
            .await
            .map_err(|e| RelayError::from_rpc(CHAIN, format!("eth_blockNumber failed: {}", e)))
    }

    async fn logs_in_range(&self, from: u64, to: u64) -> Result<Vec<Log>, RelayError> {
        let filter = self.filter().from_block(from).to_block(to);
        self.http
            .get_logs(&filter)
            .await
            .map_err(|e| RelayError::from_rpc(CHAIN, format!("eth_getLogs failed: {}", e)))
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, Log>, RelayError> {
        let provider = ProviderBuilder::new()
            .on_ws(WsConnect::new(self.ws_url.clone()))
            .await
            .map_err(|e| RelayError::TransientRpc {
                chain: CHAIN,
                message: format!("websocket connect failed: {}", e),
            })?;

        let subscription = provider
            .subscribe_logs(&self.filter())
            .await
            .map_err(|e| RelayError::TransientRpc {
                chain: CHAIN,
                message: format!("eth_subscribe failed: {}", e),
            })?;

        // The subscription only lives as long as its provider
        let logs = Box::pin(subscription.into_stream());
        let stream = stream::unfold((provider, logs), |(provider, mut logs)| async move {
            let log = logs.next().await?;
            Some((log, (provider, logs)))
        });
        Ok(stream.boxed())
    }
}

/// EVM watcher tuning
#[derive(Debug, Clone)]
pub struct EvmWatcherConfig {
    /// First block to scan when no cursor has been persisted; chain head if unset
    pub start_block: Option<u64>,
    pub max_block_range: u64,
    /// Backoff between reconnects; `max_attempts` is the consecutive-failure limit
    pub reconnect: RetryConfig,
}

impl From<&EvmConfig> for EvmWatcherConfig {
    fn from(config: &EvmConfig) -> Self {
        Self {
            start_block: config.start_block,
            max_block_range: config.max_block_range,
            reconnect: RetryConfig {
                max_attempts: config.max_reconnect_attempts,
                initial_backoff: Duration::from_secs(1),
                max_backoff: Duration::from_secs(60),
                backoff_multiplier: 2.0,
            },
        }
    }
}

/// EVM event watcher for BurnEvent logs
pub struct EvmWatcher {
    feed: Box<dyn EvmLogFeed>,
    coordinator: Coordinator,
    config: EvmWatcherConfig,
}

impl EvmWatcher {
    pub fn new(feed: Box<dyn EvmLogFeed>, coordinator: Coordinator, config: EvmWatcherConfig) -> Self {
        Self {
            feed,
            coordinator,
            config,
        }
    }

    /// Run until cancelled. Errors once reconnects keep failing past the
    /// configured limit.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            start_block = ?self.config.start_block,
            max_block_range = self.config.max_block_range,
            "EVM watcher started"
        );

        let mut failures = 0u32;
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("EVM watcher stopping");
                    return Ok(());
                }
                outcome = self.follow(&mut failures) => outcome,
            };

            let Err(e) = outcome else {
                continue;
            };

            failures += 1;
            metrics::record_error(CHAIN, "subscription");
            if failures > self.config.reconnect.max_attempts {
                error!(failures, error = %e, "EVM watcher giving up after repeated failures");
                return Err(eyre!(
                    "EVM log feed failed {} consecutive times: {}",
                    failures,
                    e
                ));
            }

            let backoff = self.config.reconnect.backoff_for_attempt(failures - 1);
            warn!(
                failures,
                max = self.config.reconnect.max_attempts,
                ?backoff,
                error = %e,
                "EVM log feed interrupted, reconnecting"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("EVM watcher stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    /// One connection lifetime: subscribe, backfill, stream
    async fn follow(&self, failures: &mut u32) -> Result<(), RelayError> {
        let mut logs = self.feed.subscribe().await?;
        let head = self.feed.head_block().await?;

        let from = match self.coordinator.cursor(Direction::EvmToL1).await? {
            Some(Cursor::Block(last)) => last + 1,
            Some(other) => {
                warn!(cursor = %other, "Ignoring non-block cursor for EVM direction");
                self.config.start_block.unwrap_or(head)
            }
            None => self.config.start_block.unwrap_or(head),
        };

        if from <= head {
            self.backfill(from, head).await?;
        }
        *failures = 0;
        metrics::record_successful_poll(CHAIN);
        info!(head, "Streaming live burn events");

        let mut open_block: Option<(u64, Vec<RelayKey>)> = None;
        while let Some(log) = logs.next().await {
            let Some(number) = log.block_number else {
                debug!(tx_hash = ?log.transaction_hash, "Skipping log without block number");
                continue;
            };
            if number <= head {
                continue;
            }

            // A later block closes the previous one
            if open_block.as_ref().is_some_and(|(block, _)| number > *block) {
                if let Some((block, keys)) = open_block.take() {
                    self.coordinator
                        .checkpoint(Direction::EvmToL1, Cursor::Block(block), &keys)
                        .await?;
                }
            }

            let (_, keys) = open_block.get_or_insert_with(|| (number, Vec::new()));
            if let Some(key) = self.relay_log(&log).await? {
                keys.push(key);
            }
            metrics::record_successful_poll(CHAIN);
        }

        Err(RelayError::TransientRpc {
            chain: CHAIN,
            message: "log subscription closed".to_string(),
        })
    }

    async fn backfill(&self, from: u64, to: u64) -> Result<(), RelayError> {
        info!(from, to, "Backfilling burn events");
        let range = self.config.max_block_range.max(1);

        let mut start = from;
        while start <= to {
            let end = to.min(start.saturating_add(range - 1));
            let logs = self.feed.logs_in_range(start, end).await?;

            let mut keys = Vec::new();
            for log in &logs {
                if let Some(key) = self.relay_log(log).await? {
                    keys.push(key);
                }
            }
            self.coordinator
                .checkpoint(Direction::EvmToL1, Cursor::Block(end), &keys)
                .await?;

            debug!(start, end, logs = logs.len(), "Backfilled block range");
            start = end + 1;
        }
        Ok(())
    }

    /// Hand one log to the coordinator. Undecodable logs are skipped.
    async fn relay_log(&self, log: &Log) -> Result<Option<RelayKey>, RelayError> {
        if log.removed {
            warn!(tx_hash = ?log.transaction_hash, block = ?log.block_number, "Skipping removed log");
            return Ok(None);
        }
        metrics::record_event_observed(Direction::EvmToL1);

        match decode_burn_log(log) {
            Ok(burn) => {
                debug!(
                    nonce = burn.nonce,
                    block = burn.block_number,
                    amount = burn.amount,
                    recipient = %burn.recipient_l1,
                    "Burn event observed"
                );
                let handle = self
                    .coordinator
                    .submit(Direction::EvmToL1, BridgeEvent::Burn(burn))
                    .await?;
                Ok(Some(handle.key()))
            }
            Err(e) => {
                error!(
                    tx_hash = ?log.transaction_hash,
                    log_index = ?log.log_index,
                    block = ?log.block_number,
                    error = %e,
                    "Skipping undecodable burn log"
                );
                metrics::record_decode_failure(Direction::EvmToL1);
                Ok(None)
            }
        }
    }
}

/// Decode a bridge log into a [`BurnEvent`]
pub fn decode_burn_log(log: &Log) -> Result<BurnEvent, RelayError> {
    if log.topics().first() != Some(&EvmBridge::BurnEvent::SIGNATURE_HASH) {
        return Err(RelayError::Decode("not a BurnEvent log".to_string()));
    }

    let decoded = EvmBridge::BurnEvent::decode_log_data(log.data(), true)
        .map_err(|e| RelayError::Decode(format!("invalid BurnEvent data: {}", e)))?;

    let recipient_l1 = L1Address::from_slice(&decoded.recipientL1)?;
    let amount = u64::try_from(decoded.amount).map_err(|_| {
        RelayError::Decode(format!("burn amount {} does not fit in u64", decoded.amount))
    })?;
    let block_number = log
        .block_number
        .ok_or_else(|| RelayError::Decode("burn log has no block number".to_string()))?;

    Ok(BurnEvent {
        sender: EvmAddress(decoded.sender.into_array()),
        recipient_l1,
        token_type: decoded.tokenType,
        amount,
        nonce: decoded.nonce,
        source_tx_hash: decoded.evmTxHash.0,
        block_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, B256, U256};

    fn burn_log(recipient: Vec<u8>, amount: U256) -> Log {
        let event = EvmBridge::BurnEvent {
            sender: Address::repeat_byte(0xaa),
            recipientL1: Bytes::from(recipient),
            tokenType: 1,
            amount,
            nonce: 7,
            evmTxHash: B256::repeat_byte(0xde),
        };
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0x01),
                data: event.encode_log_data(),
            },
            block_number: Some(100),
            transaction_hash: Some(B256::repeat_byte(0x55)),
            log_index: Some(0),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_burn_log() {
        let burn = decode_burn_log(&burn_log(vec![0x12; 32], U256::from(500_000u64))).unwrap();
        assert_eq!(burn.sender, EvmAddress([0xaa; 20]));
        assert_eq!(burn.recipient_l1, L1Address([0x12; 32]));
        assert_eq!(burn.token_type, 1);
        assert_eq!(burn.amount, 500_000);
        assert_eq!(burn.nonce, 7);
        assert_eq!(burn.source_tx_hash, [0xde; 32]);
        assert_eq!(burn.block_number, 100);
    }

    #[test]
    fn test_decode_rejects_short_recipient() {
        let err = decode_burn_log(&burn_log(vec![0x12; 20], U256::from(1u64))).unwrap_err();
        assert!(matches!(err, RelayError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_amount_overflow() {
        let err = decode_burn_log(&burn_log(vec![0x12; 32], U256::from(u64::MAX) + U256::from(1u64)))
            .unwrap_err();
        assert!(matches!(err, RelayError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_foreign_event() {
        let mut log = burn_log(vec![0x12; 32], U256::from(1u64));
        log.inner.data = alloy::primitives::LogData::new_unchecked(
            vec![B256::repeat_byte(0x99)],
            Bytes::new(),
        );
        assert!(decode_burn_log(&log).is_err());
    }

    #[test]
    fn test_decode_requires_block_number() {
        let mut log = burn_log(vec![0x12; 32], U256::from(1u64));
        log.block_number = None;
        assert!(decode_burn_log(&log).is_err());
    }
}
