//! L1 JSON-RPC client and transaction signer
//!
//! Talks to the L1 full node over JSON-RPC (`suix_*` / `sui_*` / `unsafe_*`
//! method families) and signs transaction bytes with the relayer's Ed25519
//! key using the node's intent-message format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ed25519_dalek::{Signer, SigningKey};
use eyre::{eyre, Result, WrapErr};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::RelayError;

const CHAIN: &str = "l1";

/// Ed25519 signature scheme flag
const ED25519_FLAG: u8 = 0x00;

/// Intent prefix for a transaction: scope TransactionData, version V0, app Sui
const TRANSACTION_INTENT: [u8; 3] = [0, 0, 0];

const TX_NOT_FOUND: &str = "could not find the referenced transaction";

type Blake2b256 = Blake2b<U32>;

// ============================================================================
// Response types
// ============================================================================

/// JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// JSON-RPC error
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// One page of `suix_queryTransactionBlocks`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
    #[serde(default)]
    pub data: Vec<L1Transaction>,
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
}

/// Transaction block as returned by the query and lookup endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L1Transaction {
    pub digest: String,
    #[serde(default)]
    pub events: Vec<L1Event>,
    #[serde(default)]
    pub effects: Option<TransactionEffects>,
    /// Checkpoint sequence number, present once the transaction is final
    #[serde(default)]
    pub checkpoint: Option<String>,
}

/// Event emitted by a transaction
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L1Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub parsed_json: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionEffects {
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStatus {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionBytes {
    tx_bytes: String,
}

#[derive(Debug, Deserialize)]
struct DynamicFieldResponse {
    #[serde(default)]
    data: Option<Value>,
}

/// Move entry call to build into transaction bytes
#[derive(Debug, Clone)]
pub struct MoveCall {
    pub signer: String,
    pub package_id: String,
    pub module: String,
    pub function: String,
    pub arguments: Vec<Value>,
    pub gas_budget: u64,
}

// ============================================================================
// Client
// ============================================================================

/// L1 JSON-RPC client
pub struct L1Client {
    rpc_url: String,
    client: Client,
    next_id: AtomicU64,
}

impl L1Client {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .wrap_err("Failed to create HTTP client")?;

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    /// Send a request and return either the result or the node's error object
    async fn call_raw<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<std::result::Result<T, RpcError>, RelayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::TransientRpc {
                chain: CHAIN,
                message: format!("{} request failed: {}", method, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::from_rpc(
                CHAIN,
                format!("{} returned HTTP {}", method, status.as_u16()),
            ));
        }

        let parsed: RpcResponse<T> = response.json().await.map_err(|e| {
            RelayError::TransientRpc {
                chain: CHAIN,
                message: format!("{} returned an unreadable body: {}", method, e),
            }
        })?;

        if let Some(error) = parsed.error {
            return Ok(Err(error));
        }
        parsed.result.map(Ok).ok_or_else(|| RelayError::TransientRpc {
            chain: CHAIN,
            message: format!("{} returned neither result nor error", method),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RelayError> {
        self.call_raw(method, params).await?.map_err(|e| {
            RelayError::from_rpc(CHAIN, format!("{} failed ({}): {}", method, e.code, e.message))
        })
    }

    /// Transactions that touched `object_id`, oldest first, with events
    pub async fn query_transactions(
        &self,
        object_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TransactionPage, RelayError> {
        let params = json!([
            {
                "filter": { "InputObject": object_id },
                "options": { "showEvents": true, "showEffects": true }
            },
            cursor,
            limit,
            false
        ]);
        self.call("suix_queryTransactionBlocks", params).await
    }

    /// Build unsigned transaction bytes (base64) for a Move call
    pub async fn move_call(&self, call: &MoveCall) -> Result<String, RelayError> {
        let params = json!([
            call.signer,
            call.package_id,
            call.module,
            call.function,
            [],
            call.arguments,
            null,
            call.gas_budget.to_string()
        ]);
        let bytes: TransactionBytes = self.call("unsafe_moveCall", params).await?;
        Ok(bytes.tx_bytes)
    }

    /// Execute signed transaction bytes and wait for local execution
    pub async fn execute_transaction(
        &self,
        tx_bytes: &str,
        signature: &str,
    ) -> Result<L1Transaction, RelayError> {
        let params = json!([
            tx_bytes,
            [signature],
            { "showEffects": true },
            "WaitForLocalExecution"
        ]);
        self.call("sui_executeTransactionBlock", params).await
    }

    /// Look up a transaction by digest. `None` while the node has not seen it.
    pub async fn get_transaction(&self, digest: &str) -> Result<Option<L1Transaction>, RelayError> {
        let params = json!([digest, { "showEffects": true }]);
        match self.call_raw("sui_getTransactionBlock", params).await? {
            Ok(tx) => Ok(Some(tx)),
            Err(e) if e.message.to_lowercase().contains(TX_NOT_FOUND) => {
                debug!(digest, "Transaction not yet known to node");
                Ok(None)
            }
            Err(e) => Err(RelayError::from_rpc(
                CHAIN,
                format!("sui_getTransactionBlock failed ({}): {}", e.code, e.message),
            )),
        }
    }

    /// Whether `table_id` holds an entry keyed by the u64 `nonce`
    pub async fn has_u64_entry(&self, table_id: &str, nonce: u64) -> Result<bool, RelayError> {
        let params = json!([table_id, { "type": "u64", "value": nonce.to_string() }]);
        let response: DynamicFieldResponse =
            self.call("suix_getDynamicFieldObject", params).await?;
        Ok(response.data.is_some())
    }
}

// ============================================================================
// Signer
// ============================================================================

/// Ed25519 keypair used to sign L1 transactions
pub struct L1Signer {
    key: SigningKey,
}

impl L1Signer {
    /// Accepts a 32-byte seed as hex (optionally `0x`-prefixed) or base64,
    /// or the 33-byte base64 keystore form with a leading scheme flag.
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let hex_body = encoded.strip_prefix("0x").unwrap_or(encoded);

        let bytes = if hex_body.len() == 64 && hex_body.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode(hex_body).wrap_err("Invalid hex signer key")?
        } else {
            BASE64
                .decode(encoded)
                .map_err(|e| eyre!("Signer key is neither 32-byte hex nor base64: {}", e))?
        };

        let seed: [u8; 32] = match bytes.len() {
            32 => bytes
                .as_slice()
                .try_into()
                .map_err(|_| eyre!("Invalid signer key length"))?,
            33 if bytes[0] == ED25519_FLAG => bytes[1..]
                .try_into()
                .map_err(|_| eyre!("Invalid signer key length"))?,
            33 => return Err(eyre!("Signer key flag {:#04x} is not Ed25519", bytes[0])),
            n => return Err(eyre!("Signer key must be 32 bytes, got {}", n)),
        };

        Ok(Self {
            key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Account address: blake2b-256 over the scheme flag and public key
    pub fn address(&self) -> String {
        let mut hasher = Blake2b256::new();
        hasher.update([ED25519_FLAG]);
        hasher.update(self.public_key());
        format!("0x{}", hex::encode(hasher.finalize()))
    }

    /// Sign base64 transaction bytes, returning the serialized signature
    /// (`flag || signature || public key`, base64)
    pub fn sign_transaction(&self, tx_bytes_b64: &str) -> Result<String, RelayError> {
        let tx_bytes = BASE64
            .decode(tx_bytes_b64)
            .map_err(|e| RelayError::Decode(format!("transaction bytes are not base64: {}", e)))?;

        let digest = intent_digest(&tx_bytes);
        let signature = self.key.sign(&digest);

        let mut serialized = Vec::with_capacity(1 + 64 + 32);
        serialized.push(ED25519_FLAG);
        serialized.extend_from_slice(&signature.to_bytes());
        serialized.extend_from_slice(&self.public_key());
        Ok(BASE64.encode(serialized))
    }
}

/// blake2b-256 of the transaction intent message
pub fn intent_digest(tx_bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(TRANSACTION_INTENT);
    hasher.update(tx_bytes);
    hasher.finalize().into()
}
