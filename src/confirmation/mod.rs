//! Destination-chain finality checks

pub mod evm;
pub mod l1;

pub use evm::EvmConfirmation;
pub use l1::L1Confirmation;

/// Result of checking a submitted transaction
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationResult {
    /// Transaction is pending (not yet known or not yet final)
    Pending,
    /// Included, waiting for more confirmations
    WaitingConfirmations(u64),
    /// Final and successful
    Confirmed,
    /// Final and failed on-chain
    Failed(String),
}
