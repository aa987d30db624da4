//! Destination-chain writers
//!
//! Each writer turns a source event into the compensating transaction on the
//! opposite chain:
//! - EVM → L1: [`L1Writer`] calls `bridge_l1::unlock`
//! - L1 → EVM: [`EvmWriter`] calls `mint`

use async_trait::async_trait;

use crate::confirmation::ConfirmationResult;
use crate::error::RelayError;
use crate::types::BridgeEvent;

pub mod evm;
pub mod l1;
pub mod retry;

pub use evm::EvmWriter;
pub use l1::L1Writer;
pub use retry::{classify_error, with_retry, RetryConfig};

/// A chain the coordinator can relay into
#[async_trait]
pub trait Destination: Send + Sync {
    /// Short chain label for logs and metrics
    fn chain(&self) -> &'static str;

    /// Whether the destination already recorded the event's nonce
    async fn is_processed(&self, event: &BridgeEvent) -> Result<bool, RelayError>;

    /// Build, sign and send the compensating transaction. Returns the
    /// destination transaction reference.
    async fn submit(&self, event: &BridgeEvent) -> Result<String, RelayError>;

    async fn check_confirmation(&self, tx_ref: &str) -> Result<ConfirmationResult, RelayError>;
}
