//! L1 watcher for bridge `LockEvent`s
//!
//! Polls transactions that touched the bridge object, oldest first, and hands
//! every lock event to the coordinator. The position used for the next page
//! is kept in memory; the persisted cursor only moves once the coordinator
//! reports the page's relays terminal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use serde::{de, Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::L1Config;
use crate::coordinator::Coordinator;
use crate::error::RelayError;
use crate::l1_client::{L1Client, L1Event, TransactionPage};
use crate::metrics;
use crate::types::{normalize_l1_id, BridgeEvent, Cursor, Direction, EvmAddress, L1Address, LockEvent};

const CHAIN: &str = "l1";
const LOCK_EVENT_SUFFIX: &str = "::bridge_l1::LockEvent";

/// Source of transactions touching the bridge object
#[async_trait]
pub trait L1EventSource: Send + Sync {
    /// Transactions after `cursor` (exclusive), oldest first
    async fn query_transactions(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TransactionPage, RelayError>;
}

/// [`L1EventSource`] backed by `suix_queryTransactionBlocks`
pub struct BridgeTransactions {
    client: Arc<L1Client>,
    bridge_object_id: String,
}

impl BridgeTransactions {
    pub fn new(client: Arc<L1Client>, bridge_object_id: impl Into<String>) -> Self {
        Self {
            client,
            bridge_object_id: bridge_object_id.into(),
        }
    }
}

#[async_trait]
impl L1EventSource for BridgeTransactions {
    async fn query_transactions(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TransactionPage, RelayError> {
        self.client
            .query_transactions(&self.bridge_object_id, cursor, limit)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct L1WatcherConfig {
    pub package_id: String,
    pub poll_interval: Duration,
    /// First delay after a failed fetch; doubles up to `max_backoff`
    pub error_backoff: Duration,
    pub max_backoff: Duration,
    pub page_size: usize,
}

impl From<&L1Config> for L1WatcherConfig {
    fn from(config: &L1Config) -> Self {
        Self {
            package_id: config.package_id.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            error_backoff: Duration::from_millis(config.error_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            page_size: config.page_size,
        }
    }
}

/// L1 event watcher for LockEvent
pub struct L1Watcher {
    source: Box<dyn L1EventSource>,
    coordinator: Coordinator,
    package_id: String,
    config: L1WatcherConfig,
}

impl L1Watcher {
    pub fn new(
        source: Box<dyn L1EventSource>,
        coordinator: Coordinator,
        config: L1WatcherConfig,
    ) -> Self {
        let package_id = normalize_l1_id(&config.package_id)
            .unwrap_or_else(|| config.package_id.to_lowercase());
        Self {
            source,
            coordinator,
            package_id,
            config,
        }
    }

    /// Poll until cancelled. Fetch and store errors back off and retry;
    /// this loop does not fail on its own.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            package_id = %self.package_id,
            poll_interval = ?self.config.poll_interval,
            page_size = self.config.page_size,
            "L1 watcher started"
        );

        // None until the persisted cursor has been read
        let mut position: Option<Option<String>> = None;
        let mut backoff = self.config.error_backoff;

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("L1 watcher stopping");
                    return Ok(());
                }
                outcome = self.poll_once(&mut position) => outcome,
            };

            let delay = match outcome {
                Ok(more_pages) => {
                    backoff = self.config.error_backoff;
                    metrics::record_successful_poll(CHAIN);
                    if more_pages {
                        continue;
                    }
                    self.config.poll_interval
                }
                Err(e) => {
                    let delay = backoff;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                    metrics::record_error(CHAIN, "poll");
                    warn!(error = %e, ?delay, "L1 poll failed, backing off");
                    delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("L1 watcher stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Process one page. Returns whether another page is ready right away.
    async fn poll_once(&self, position: &mut Option<Option<String>>) -> Result<bool, RelayError> {
        let cursor = match position {
            Some(cursor) => cursor.clone(),
            None => {
                let loaded = self.initial_position().await?;
                *position = Some(loaded.clone());
                loaded
            }
        };

        let page = self
            .source
            .query_transactions(cursor.as_deref(), self.config.page_size)
            .await?;

        let mut keys = Vec::new();
        for tx in &page.data {
            for event in &tx.events {
                if !is_lock_event(&event.event_type, &self.package_id) {
                    continue;
                }
                metrics::record_event_observed(Direction::L1ToEvm);

                match decode_lock_event(event, &tx.digest) {
                    Ok(lock) => {
                        debug!(
                            nonce = lock.nonce,
                            tx_digest = %lock.tx_digest,
                            amount = lock.amount,
                            recipient = %lock.recipient_evm,
                            "Lock event observed"
                        );
                        let handle = self
                            .coordinator
                            .submit(Direction::L1ToEvm, BridgeEvent::Lock(lock))
                            .await?;
                        keys.push(handle.key());
                    }
                    Err(e) => {
                        error!(
                            tx_digest = %tx.digest,
                            event_type = %event.event_type,
                            error = %e,
                            "Skipping undecodable lock event"
                        );
                        metrics::record_decode_failure(Direction::L1ToEvm);
                    }
                }
            }
        }

        let Some(newest) = page.data.last().map(|tx| tx.digest.clone()) else {
            return Ok(false);
        };
        self.coordinator
            .checkpoint(Direction::L1ToEvm, Cursor::Digest(newest.clone()), &keys)
            .await?;
        debug!(transactions = page.data.len(), locks = keys.len(), cursor = %newest, "L1 page processed");
        *position = Some(Some(newest));

        Ok(page.has_next_page)
    }

    async fn initial_position(&self) -> Result<Option<String>, RelayError> {
        match self.coordinator.cursor(Direction::L1ToEvm).await? {
            Some(Cursor::Digest(digest)) => {
                info!(cursor = %digest, "Resuming L1 watcher from stored cursor");
                Ok(Some(digest))
            }
            Some(other) => {
                warn!(cursor = %other, "Ignoring non-digest cursor for L1 direction");
                Ok(None)
            }
            None => {
                info!("No stored L1 cursor, scanning from the first bridge transaction");
                Ok(None)
            }
        }
    }
}

/// Whether `event_type` is `<package_id>::bridge_l1::LockEvent`.
/// `package_id` must already be normalized.
pub fn is_lock_event(event_type: &str, package_id: &str) -> bool {
    let Some(package) = event_type.strip_suffix(LOCK_EVENT_SUFFIX) else {
        return false;
    };
    normalize_l1_id(package).is_some_and(|p| p == package_id)
}

/// `parsedJson` of a LockEvent
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLockEvent {
    sender: String,
    recipient_evm: ByteVec,
    #[serde(deserialize_with = "deserialize_string_to_u8")]
    token_type: u8,
    #[serde(deserialize_with = "deserialize_string_to_u64")]
    amount: u64,
    #[serde(deserialize_with = "deserialize_string_to_u64")]
    nonce: u64,
    tx_digest: ByteVec,
}

/// Move `vector<u8>`: a JSON byte array, or a hex string from some nodes
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ByteVec {
    Bytes(Vec<u8>),
    Hex(String),
}

impl ByteVec {
    fn into_bytes(self) -> Result<Vec<u8>, RelayError> {
        match self {
            ByteVec::Bytes(bytes) => Ok(bytes),
            ByteVec::Hex(s) => hex::decode(s.strip_prefix("0x").unwrap_or(&s))
                .map_err(|e| RelayError::Decode(format!("invalid hex byte vector: {}", e))),
        }
    }
}

/// Decode a LockEvent found in transaction `tx_digest`
pub fn decode_lock_event(event: &L1Event, tx_digest: &str) -> Result<LockEvent, RelayError> {
    let raw: RawLockEvent = serde_json::from_value(event.parsed_json.clone())
        .map_err(|e| RelayError::Decode(format!("invalid LockEvent: {}", e)))?;

    let sender = L1Address::from_hex(&raw.sender)?;
    let recipient_evm = EvmAddress::from_slice(&raw.recipient_evm.into_bytes()?)?;
    let source_tx_digest = raw.tx_digest.into_bytes()?;
    if source_tx_digest.is_empty() {
        return Err(RelayError::Decode("LockEvent tx_digest is empty".to_string()));
    }

    Ok(LockEvent {
        sender,
        recipient_evm,
        token_type: raw.token_type,
        amount: raw.amount,
        nonce: raw.nonce,
        source_tx_digest,
        tx_digest: tx_digest.to_string(),
    })
}

/// Move prints u64 as a JSON string and u8 as a number; accept both
fn deserialize_string_to_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrU64Visitor;

    impl de::Visitor<'_> for StringOrU64Visitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a decimal string or unsigned integer")
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<u64, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> std::result::Result<u64, E>
        where
            E: de::Error,
        {
            u64::try_from(value).map_err(|_| E::custom(format!("negative value {}", value)))
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<u64, E>
        where
            E: de::Error,
        {
            value
                .parse::<u64>()
                .map_err(|_| E::custom(format!("invalid u64 string: {}", value)))
        }
    }

    deserializer.deserialize_any(StringOrU64Visitor)
}

fn deserialize_string_to_u8<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = deserialize_string_to_u64(deserializer)?;
    u8::try_from(value).map_err(|_| de::Error::custom(format!("u8 out of range: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PACKAGE: &str = "0x00000000000000000000000000000000000000000000000000000000000000b1";

    fn lock_event(parsed_json: serde_json::Value) -> L1Event {
        L1Event {
            event_type: format!("{}{}", PACKAGE, LOCK_EVENT_SUFFIX),
            parsed_json,
        }
    }

    fn valid_json() -> serde_json::Value {
        json!({
            "sender": "0x2",
            "recipient_evm": vec![0xabu8; 20],
            "token_type": 1,
            "amount": "500000",
            "nonce": "7",
            "tx_digest": [1, 2, 3]
        })
    }

    #[test]
    fn test_is_lock_event_matches_package() {
        let package = normalize_l1_id(PACKAGE).unwrap();
        assert!(is_lock_event("0xb1::bridge_l1::LockEvent", &package));
        assert!(is_lock_event(&format!("{}::bridge_l1::LockEvent", PACKAGE), &package));
        assert!(!is_lock_event("0xb2::bridge_l1::LockEvent", &package));
        assert!(!is_lock_event("0xb1::bridge_l1::UnlockEvent", &package));
        assert!(!is_lock_event("0xb1::other::LockEvent", &package));
    }

    #[test]
    fn test_decode_lock_event() {
        let lock = decode_lock_event(&lock_event(valid_json()), "DigestA").unwrap();
        assert_eq!(lock.sender.0[31], 2);
        assert_eq!(lock.recipient_evm, EvmAddress([0xab; 20]));
        assert_eq!(lock.token_type, 1);
        assert_eq!(lock.amount, 500_000);
        assert_eq!(lock.nonce, 7);
        assert_eq!(lock.source_tx_digest, vec![1, 2, 3]);
        assert_eq!(lock.tx_digest, "DigestA");
    }

    #[test]
    fn test_decode_accepts_numeric_and_hex_forms() {
        let mut value = valid_json();
        value["amount"] = json!(42);
        value["recipient_evm"] = json!(format!("0x{}", "cd".repeat(20)));
        value["tx_digest"] = json!("0x0a0b");

        let lock = decode_lock_event(&lock_event(value), "DigestB").unwrap();
        assert_eq!(lock.amount, 42);
        assert_eq!(lock.recipient_evm, EvmAddress([0xcd; 20]));
        assert_eq!(lock.source_tx_digest, vec![0x0a, 0x0b]);
    }

    #[test]
    fn test_decode_rejects_unknown_fields() {
        let mut value = valid_json();
        value["memo"] = json!("hello");
        assert!(matches!(
            decode_lock_event(&lock_event(value), "D"),
            Err(RelayError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_values() {
        let mut wrong_recipient = valid_json();
        wrong_recipient["recipient_evm"] = json!(vec![0xabu8; 32]);
        assert!(decode_lock_event(&lock_event(wrong_recipient), "D").is_err());

        let mut bad_amount = valid_json();
        bad_amount["amount"] = json!("12abc");
        assert!(decode_lock_event(&lock_event(bad_amount), "D").is_err());

        let mut negative = valid_json();
        negative["nonce"] = json!(-1);
        assert!(decode_lock_event(&lock_event(negative), "D").is_err());

        let mut wide_token = valid_json();
        wide_token["token_type"] = json!(256);
        assert!(decode_lock_event(&lock_event(wide_token), "D").is_err());

        let mut empty_digest = valid_json();
        empty_digest["tx_digest"] = json!([]);
        assert!(decode_lock_event(&lock_event(empty_digest), "D").is_err());

        let mut missing = valid_json();
        missing.as_object_mut().unwrap().remove("sender");
        assert!(decode_lock_event(&lock_event(missing), "D").is_err());
    }
}
