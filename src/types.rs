//! Common types for the relay pipeline
//!
//! Events observed on either chain, the relay direction and status enums
//! persisted by the store, and the address newtypes shared by decoders and
//! writers.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::RelayError;

// ============================================================================
// Addresses
// ============================================================================

/// 20-byte EVM address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EvmAddress(pub [u8; 20]);

impl EvmAddress {
    /// Parse from hex string (with or without 0x prefix)
    pub fn from_hex(s: &str) -> Result<Self, RelayError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)
            .map_err(|e| RelayError::Decode(format!("invalid EVM address hex: {}", e)))?;
        Self::from_slice(&bytes)
    }

    /// Build from raw bytes, which must be exactly 20 long
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RelayError> {
        let arr: [u8; 20] = bytes.try_into().map_err(|_| {
            RelayError::Decode(format!(
                "EVM address must be 20 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// 32-byte L1 account / object address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct L1Address(pub [u8; 32]);

impl L1Address {
    /// Parse from hex string. Short forms (`0x2`) are left-padded to 32 bytes,
    /// matching how the L1 node prints well-known addresses.
    pub fn from_hex(s: &str) -> Result<Self, RelayError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.is_empty() || s.len() > 64 {
            return Err(RelayError::Decode(format!(
                "L1 address must be 1-64 hex chars, got {}",
                s.len()
            )));
        }
        let padded = format!("{:0>64}", s);
        let bytes = hex::decode(&padded)
            .map_err(|e| RelayError::Decode(format!("invalid L1 address hex: {}", e)))?;
        Self::from_slice(&bytes)
    }

    /// Build from raw bytes, which must be exactly 32 long
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RelayError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            RelayError::Decode(format!("L1 address must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for L1Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

macro_rules! hex_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                <$ty>::from_hex(&s).map_err(de::Error::custom)
            }
        }
    };
}

hex_serde!(EvmAddress);
hex_serde!(L1Address);

/// Normalize an L1 object or package id to the canonical `0x` + 64 hex form
pub fn normalize_l1_id(id: &str) -> Option<String> {
    L1Address::from_hex(id)
        .ok()
        .map(|a| a.to_hex().to_lowercase())
}

// ============================================================================
// Direction & Status
// ============================================================================

/// Relay direction, named after source → destination
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "VARCHAR")]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// EVM burn → L1 unlock
    #[sqlx(rename = "evm_to_l1")]
    EvmToL1,
    /// L1 lock → EVM mint
    #[sqlx(rename = "l1_to_evm")]
    L1ToEvm,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::EvmToL1, Direction::L1ToEvm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::EvmToL1 => "evm_to_l1",
            Direction::L1ToEvm => "l1_to_evm",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing status of a relay record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl Status {
    /// Get the status as a lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Submitted => "submitted",
            Status::Confirmed => "confirmed",
            Status::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Confirmed | Status::Failed)
    }

    /// Records only move forward. `Pending → Confirmed` covers a nonce the
    /// destination chain already processed.
    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Pending, Status::Submitted)
                | (Status::Pending, Status::Confirmed)
                | (Status::Pending, Status::Failed)
                | (Status::Submitted, Status::Confirmed)
                | (Status::Submitted, Status::Failed)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Idempotency key: a source nonce within one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelayKey {
    pub direction: Direction,
    pub nonce: u64,
}

impl RelayKey {
    pub fn new(direction: Direction, nonce: u64) -> Self {
        Self { direction, nonce }
    }
}

impl fmt::Display for RelayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.direction, self.nonce)
    }
}

/// Per-direction resume point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Cursor {
    /// Last fully processed EVM block height
    Block(u64),
    /// Newest processed L1 transaction digest
    Digest(String),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Block(n) => write!(f, "block:{}", n),
            Cursor::Digest(d) => write!(f, "digest:{}", d),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Burn observed on the EVM bridge contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnEvent {
    pub sender: EvmAddress,
    pub recipient_l1: L1Address,
    pub token_type: u8,
    pub amount: u64,
    pub nonce: u64,
    /// `evmTxHash` as emitted by the contract; forwarded to `unlock`
    pub source_tx_hash: [u8; 32],
    pub block_number: u64,
}

/// Lock observed on the L1 bridge object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEvent {
    pub sender: L1Address,
    pub recipient_evm: EvmAddress,
    pub token_type: u8,
    pub amount: u64,
    pub nonce: u64,
    /// `tx_digest` field of the event; forwarded to `mint`
    pub source_tx_digest: Vec<u8>,
    /// Digest of the L1 transaction the event was found in
    pub tx_digest: String,
}

/// Event observed on either chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeEvent {
    Burn(BurnEvent),
    Lock(LockEvent),
}

impl BridgeEvent {
    pub fn direction(&self) -> Direction {
        match self {
            BridgeEvent::Burn(_) => Direction::EvmToL1,
            BridgeEvent::Lock(_) => Direction::L1ToEvm,
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            BridgeEvent::Burn(e) => e.nonce,
            BridgeEvent::Lock(e) => e.nonce,
        }
    }

    pub fn amount(&self) -> u64 {
        match self {
            BridgeEvent::Burn(e) => e.amount,
            BridgeEvent::Lock(e) => e.amount,
        }
    }

    pub fn key(&self) -> RelayKey {
        RelayKey::new(self.direction(), self.nonce())
    }

    /// Reference to the source-chain transaction, for operators
    pub fn source_tx_ref(&self) -> String {
        match self {
            BridgeEvent::Burn(e) => format!("0x{}", hex::encode(e.source_tx_hash)),
            BridgeEvent::Lock(e) => e.tx_digest.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evm_address_from_hex() {
        let addr = EvmAddress::from_hex("0xdead000000000000000000000000000000000000").unwrap();
        assert_eq!(addr.0[0], 0xde);
        assert_eq!(addr.0[1], 0xad);
        assert!(EvmAddress::from_hex("0xdead").is_err());
    }

    #[test]
    fn test_l1_address_short_form_is_padded() {
        let addr = L1Address::from_hex("0x2").unwrap();
        assert_eq!(addr.0[31], 2);
        assert!(addr.0[..31].iter().all(|b| *b == 0));
        assert!(L1Address::from_hex(&format!("0x{}", "1".repeat(65))).is_err());
        assert!(L1Address::from_slice(&[0u8; 20]).is_err());
    }

    #[test]
    fn test_normalize_l1_id() {
        assert_eq!(
            normalize_l1_id("0xABC").unwrap(),
            format!("0x{:0>64}", "abc")
        );
        assert!(normalize_l1_id("not-hex").is_none());
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(Status::Pending.as_str(), "pending");
        assert_eq!(Status::Submitted.as_str(), "submitted");
        assert_eq!(Status::Confirmed.as_str(), "confirmed");
        assert_eq!(Status::Failed.as_str(), "failed");
    }

    #[test]
    fn test_status_transitions_forward_only() {
        assert!(Status::Pending.can_transition_to(Status::Submitted));
        assert!(Status::Pending.can_transition_to(Status::Confirmed));
        assert!(Status::Submitted.can_transition_to(Status::Failed));
        assert!(!Status::Submitted.can_transition_to(Status::Pending));
        assert!(!Status::Confirmed.can_transition_to(Status::Failed));
        assert!(!Status::Failed.can_transition_to(Status::Pending));
    }

    #[test]
    fn test_event_serde_shape() {
        let event = BridgeEvent::Lock(LockEvent {
            sender: L1Address([1u8; 32]),
            recipient_evm: EvmAddress([2u8; 20]),
            token_type: 0,
            amount: 10,
            nonce: 3,
            source_tx_digest: vec![9, 9],
            tx_digest: "Digest1".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "lock");
        assert_eq!(json["recipient_evm"], format!("0x{}", "02".repeat(20)));

        let back: BridgeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.key(), RelayKey::new(Direction::L1ToEvm, 3));
    }

    #[test]
    fn test_cursor_display() {
        assert_eq!(Cursor::Block(12).to_string(), "block:12");
        assert_eq!(Cursor::Digest("abc".into()).to_string(), "digest:abc");
    }
}
