//! Relay error kinds
//!
//! Chain-facing code reports failures as [`RelayError`] so the coordinator
//! can decide between retrying, failing the record, or skipping the event.

use thiserror::Error;

use crate::types::Direction;
use crate::writers::retry::{classify_error, ErrorClass};

#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// Event payload did not match the expected shape. Never retried.
    #[error("decode error: {0}")]
    Decode(String),

    /// Network or node failure that may clear up on its own
    #[error("transient {chain} RPC error: {message}")]
    TransientRpc { chain: &'static str, message: String },

    /// Destination chain refused the transaction
    #[error("{chain} rejected submission: {message}")]
    SubmissionRejected { chain: &'static str, message: String },

    #[error("transaction {tx_ref} not finalized after {waited_secs}s")]
    FinalityTimeout { tx_ref: String, waited_secs: u64 },

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{event} event submitted as {requested}")]
    DirectionMismatch {
        event: Direction,
        requested: Direction,
    },
}

impl RelayError {
    /// Only transient RPC failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::TransientRpc { .. })
    }

    /// Map a raw node/transport error message onto a relay error kind
    pub fn from_rpc(chain: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        match classify_error(&message) {
            ErrorClass::Permanent => RelayError::SubmissionRejected { chain, message },
            ErrorClass::Transient
            | ErrorClass::Underpriced
            | ErrorClass::NonceTooLow
            | ErrorClass::NonceTooHigh
            | ErrorClass::Unknown => RelayError::TransientRpc { chain, message },
        }
    }

    pub fn store(err: eyre::Report) -> Self {
        RelayError::Store(format!("{:#}", err))
    }
}
