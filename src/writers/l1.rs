//! L1 Writer - Submits unlocks to the L1 bridge
//!
//! For every EVM burn, builds a `bridge_l1::unlock` Move call against the
//! shared bridge object, signs it with the relayer key and executes it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::Destination;
use crate::config::L1Config;
use crate::confirmation::{ConfirmationResult, L1Confirmation};
use crate::error::RelayError;
use crate::l1_client::{L1Client, L1Signer, MoveCall};
use crate::types::{normalize_l1_id, BridgeEvent, BurnEvent, Direction};

const CHAIN: &str = "l1";
const BRIDGE_MODULE: &str = "bridge_l1";
const UNLOCK_FUNCTION: &str = "unlock";

/// L1 transaction writer for EVM → L1 unlocks
pub struct L1Writer {
    client: Arc<L1Client>,
    signer: L1Signer,
    signer_address: String,
    package_id: String,
    bridge_object_id: String,
    processed_nonces_table_id: String,
    gas_budget: u64,
    confirmation: L1Confirmation,
}

impl L1Writer {
    pub fn new(client: Arc<L1Client>, config: &L1Config) -> Result<Self, RelayError> {
        let signer = L1Signer::from_encoded(&config.signer_key)
            .map_err(|e| RelayError::Config(format!("invalid L1 signer key: {}", e)))?;
        let package_id = normalize_l1_id(&config.package_id)
            .ok_or_else(|| RelayError::Config("invalid L1 package id".to_string()))?;
        let bridge_object_id = normalize_l1_id(&config.bridge_object_id)
            .ok_or_else(|| RelayError::Config("invalid L1 bridge object id".to_string()))?;
        let processed_nonces_table_id = normalize_l1_id(&config.processed_nonces_table_id)
            .ok_or_else(|| {
                RelayError::Config("invalid L1 processed nonces table id".to_string())
            })?;

        let signer_address = signer.address();
        info!(
            signer = %signer_address,
            package = %package_id,
            bridge_object = %bridge_object_id,
            "L1 writer initialized"
        );

        Ok(Self {
            confirmation: L1Confirmation::new(client.clone()),
            client,
            signer,
            signer_address,
            package_id,
            bridge_object_id,
            processed_nonces_table_id,
            gas_budget: config.gas_budget,
        })
    }

    pub fn signer_address(&self) -> &str {
        &self.signer_address
    }

    fn burn<'a>(&self, event: &'a BridgeEvent) -> Result<&'a BurnEvent, RelayError> {
        match event {
            BridgeEvent::Burn(burn) => Ok(burn),
            other => Err(RelayError::DirectionMismatch {
                event: other.direction(),
                requested: Direction::EvmToL1,
            }),
        }
    }

    fn unlock_call(&self, burn: &BurnEvent) -> MoveCall {
        MoveCall {
            signer: self.signer_address.clone(),
            package_id: self.package_id.clone(),
            module: BRIDGE_MODULE.to_string(),
            function: UNLOCK_FUNCTION.to_string(),
            arguments: unlock_arguments(&self.bridge_object_id, burn),
            gas_budget: self.gas_budget,
        }
    }
}

/// Bridge object first, then the burn fields in `unlock` parameter order.
/// u64 values travel as strings in L1 JSON arguments.
pub fn unlock_arguments(bridge_object_id: &str, burn: &BurnEvent) -> Vec<Value> {
    vec![
        json!(bridge_object_id),
        json!(burn.recipient_l1.to_hex()),
        json!(burn.token_type),
        json!(burn.amount.to_string()),
        json!(burn.nonce.to_string()),
        json!(burn.source_tx_hash.to_vec()),
    ]
}

#[async_trait]
impl Destination for L1Writer {
    fn chain(&self) -> &'static str {
        CHAIN
    }

    async fn is_processed(&self, event: &BridgeEvent) -> Result<bool, RelayError> {
        let burn = self.burn(event)?;
        self.client
            .has_u64_entry(&self.processed_nonces_table_id, burn.nonce)
            .await
    }

    async fn submit(&self, event: &BridgeEvent) -> Result<String, RelayError> {
        let burn = self.burn(event)?;

        debug!(
            recipient = %burn.recipient_l1,
            token_type = burn.token_type,
            amount = burn.amount,
            evm_nonce = burn.nonce,
            "Submitting unlock"
        );

        let tx_bytes = self.client.move_call(&self.unlock_call(burn)).await?;
        let signature = self.signer.sign_transaction(&tx_bytes)?;
        let executed = self.client.execute_transaction(&tx_bytes, &signature).await?;

        if let Some(effects) = &executed.effects {
            if !effects.status.is_success() {
                return Err(RelayError::SubmissionRejected {
                    chain: CHAIN,
                    message: effects
                        .status
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("unlock {} aborted", executed.digest)),
                });
            }
        }

        info!(digest = %executed.digest, evm_nonce = burn.nonce, "Unlock executed");
        Ok(executed.digest)
    }

    async fn check_confirmation(&self, tx_ref: &str) -> Result<ConfirmationResult, RelayError> {
        self.confirmation.check(tx_ref).await
    }
}
