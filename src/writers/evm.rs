//! EVM Writer - Submits mints to the EVM bridge
//!
//! For every L1 lock, sends `mint` to the bridge contract and answers
//! `processedNonces` lookups used by the coordinator's retry path.

use std::str::FromStr;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, info};

use super::Destination;
use crate::config::EvmConfig;
use crate::confirmation::{ConfirmationResult, EvmConfirmation};
use crate::contracts::evm_bridge::EvmBridge;
use crate::error::RelayError;
use crate::types::{BridgeEvent, Direction, LockEvent};

const CHAIN: &str = "evm";

/// EVM transaction writer for L1 → EVM mints
pub struct EvmWriter {
    rpc_url: Url,
    bridge_address: Address,
    signer: PrivateKeySigner,
    confirmation: EvmConfirmation,
}

impl EvmWriter {
    pub fn new(config: &EvmConfig) -> Result<Self, RelayError> {
        let rpc_url: Url = config
            .rpc_url
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid EVM RPC URL: {}", e)))?;
        let bridge_address = Address::from_str(&config.bridge_address)
            .map_err(|e| RelayError::Config(format!("invalid bridge address: {}", e)))?;
        let signer: PrivateKeySigner = config
            .private_key
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid EVM private key: {}", e)))?;
        let confirmation = EvmConfirmation::new(config.confirmations, config.rpc_url.clone())
            .map_err(|e| RelayError::Config(format!("{:#}", e)))?;

        info!(
            signer = %signer.address(),
            bridge = %bridge_address,
            chain_id = config.chain_id,
            "EVM writer initialized"
        );

        Ok(Self {
            rpc_url,
            bridge_address,
            signer,
            confirmation,
        })
    }

    fn lock<'a>(&self, event: &'a BridgeEvent) -> Result<&'a LockEvent, RelayError> {
        match event {
            BridgeEvent::Lock(lock) => Ok(lock),
            other => Err(RelayError::DirectionMismatch {
                event: other.direction(),
                requested: Direction::L1ToEvm,
            }),
        }
    }
}

#[async_trait]
impl Destination for EvmWriter {
    fn chain(&self) -> &'static str {
        CHAIN
    }

    async fn is_processed(&self, event: &BridgeEvent) -> Result<bool, RelayError> {
        let lock = self.lock(event)?;
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let contract = EvmBridge::new(self.bridge_address, &provider);

        let processed = contract
            .processedNonces(lock.nonce)
            .call()
            .await
            .map_err(|e| RelayError::from_rpc(CHAIN, format!("processedNonces failed: {}", e)))?;
        Ok(processed._0)
    }

    async fn submit(&self, event: &BridgeEvent) -> Result<String, RelayError> {
        let lock = self.lock(event)?;

        // Build provider with signer
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.clone());
        let contract = EvmBridge::new(self.bridge_address, &provider);

        let recipient = Address::from(lock.recipient_evm.0);
        debug!(
            recipient = %recipient,
            token_type = lock.token_type,
            amount = lock.amount,
            l1_nonce = lock.nonce,
            "Submitting mint"
        );

        let pending_tx = contract
            .mint(
                recipient,
                lock.token_type,
                U256::from(lock.amount),
                lock.nonce,
                Bytes::from(lock.source_tx_digest.clone()),
            )
            .send()
            .await
            .map_err(|e| RelayError::from_rpc(CHAIN, format!("mint failed: {}", e)))?;

        let tx_hash = format!("0x{:x}", pending_tx.tx_hash());
        info!(tx_hash = %tx_hash, l1_nonce = lock.nonce, "Mint transaction sent");
        Ok(tx_hash)
    }

    async fn check_confirmation(&self, tx_ref: &str) -> Result<ConfirmationResult, RelayError> {
        self.confirmation.check(tx_ref).await
    }
}
