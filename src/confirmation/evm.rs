use std::time::Duration;

use eyre::{Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::ConfirmationResult;
use crate::error::RelayError;

const CHAIN: &str = "evm";

/// EVM transaction receipt from RPC
#[derive(Debug, Deserialize)]
struct TransactionReceipt {
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    status: Option<String>,
}

/// EVM RPC response wrapper
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// EVM RPC error
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i32,
    message: String,
}

/// EVM confirmation checker
pub struct EvmConfirmation {
    required_confirmations: u32,
    rpc_url: String,
    client: Client,
}

impl EvmConfirmation {
    pub fn new(required_confirmations: u32, rpc_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .wrap_err("Failed to create HTTP client")?;

        Ok(Self {
            required_confirmations,
            rpc_url,
            client,
        })
    }

    /// Check a mint transaction by hash
    pub async fn check(&self, tx_hash: &str) -> Result<ConfirmationResult, RelayError> {
        let Some(receipt) = self
            .rpc::<TransactionReceipt>("eth_getTransactionReceipt", json!([tx_hash]))
            .await?
        else {
            return Ok(ConfirmationResult::Pending);
        };

        let Some(tx_block) = receipt.block_number.as_deref().map(parse_quantity).transpose()?
        else {
            return Ok(ConfirmationResult::Pending);
        };

        let head = self
            .rpc::<String>("eth_blockNumber", json!([]))
            .await?
            .ok_or_else(|| RelayError::TransientRpc {
                chain: CHAIN,
                message: "eth_blockNumber returned no result".to_string(),
            })?;
        let head = parse_quantity(&head)?;

        Ok(evaluate_receipt(
            receipt.status.as_deref(),
            tx_block,
            head,
            self.required_confirmations,
        ))
    }

    async fn rpc<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, RelayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
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
            })?
            .json::<RpcResponse<T>>()
            .await
            .map_err(|e| RelayError::TransientRpc {
                chain: CHAIN,
                message: format!("{} returned an unreadable body: {}", method, e),
            })?;

        if let Some(error) = response.error {
            return Err(RelayError::from_rpc(
                CHAIN,
                format!("{} failed ({}): {}", method, error.code, error.message),
            ));
        }

        Ok(response.result)
    }
}

fn parse_quantity(value: &str) -> Result<u64, RelayError> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16).map_err(|e| {
        RelayError::TransientRpc {
            chain: CHAIN,
            message: format!("invalid hex quantity {}: {}", value, e),
        }
    })
}

/// The inclusion block counts as the first confirmation
fn evaluate_receipt(
    status: Option<&str>,
    tx_block: u64,
    head: u64,
    required_confirmations: u32,
) -> ConfirmationResult {
    if status == Some("0x0") {
        return ConfirmationResult::Failed(format!("mint reverted in block {}", tx_block));
    }

    let confirmations = head.saturating_sub(tx_block) + 1;
    if confirmations >= required_confirmations as u64 {
        ConfirmationResult::Confirmed
    } else {
        ConfirmationResult::WaitingConfirmations(confirmations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_receipt() {
        assert_eq!(
            evaluate_receipt(Some("0x1"), 100, 100, 1),
            ConfirmationResult::Confirmed
        );
        assert_eq!(
            evaluate_receipt(Some("0x1"), 100, 101, 3),
            ConfirmationResult::WaitingConfirmations(2)
        );
        assert_eq!(
            evaluate_receipt(Some("0x1"), 100, 102, 3),
            ConfirmationResult::Confirmed
        );
        assert!(matches!(
            evaluate_receipt(Some("0x0"), 100, 200, 1),
            ConfirmationResult::Failed(_)
        ));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x10").unwrap(), 16);
        assert!(parse_quantity("0xzz").is_err());
    }
}
