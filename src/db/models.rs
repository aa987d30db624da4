use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::types::{BridgeEvent, Direction, RelayKey, Status};

// Nonces are u64 on both chains, so they are stored as NUMERIC(20,0) and
// travel as text: `$n::NUMERIC` on insert, `nonce::TEXT` on select.

/// Persisted relay record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRecord {
    pub direction: Direction,
    pub nonce: u64,
    pub source_tx_ref: String,
    pub dest_tx_ref: Option<String>,
    pub status: Status,
    pub event: BridgeEvent,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RelayRecord {
    pub fn key(&self) -> RelayKey {
        RelayKey::new(self.direction, self.nonce)
    }
}

/// Row shape as read from `relay_records`
#[derive(Debug, FromRow)]
pub(crate) struct RelayRecordRow {
    pub direction: Direction,
    pub nonce: String,
    pub source_tx_ref: String,
    pub dest_tx_ref: Option<String>,
    pub status: Status,
    pub payload: Json<BridgeEvent>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RelayRecordRow> for RelayRecord {
    type Error = eyre::Report;

    fn try_from(row: RelayRecordRow) -> Result<Self> {
        let nonce = row
            .nonce
            .parse::<u64>()
            .map_err(|e| eyre!("Stored nonce {} is not a u64: {}", row.nonce, e))?;
        Ok(Self {
            direction: row.direction,
            nonce,
            source_tx_ref: row.source_tx_ref,
            dest_tx_ref: row.dest_tx_ref,
            status: row.status,
            event: row.payload.0,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// For inserting new relay records
#[derive(Debug, Clone)]
pub struct NewRelayRecord {
    pub direction: Direction,
    pub nonce: u64,
    pub source_tx_ref: String,
    pub event: BridgeEvent,
}

impl NewRelayRecord {
    pub fn from_event(event: &BridgeEvent) -> Self {
        Self {
            direction: event.direction(),
            nonce: event.nonce(),
            source_tx_ref: event.source_tx_ref(),
            event: event.clone(),
        }
    }

    pub fn key(&self) -> RelayKey {
        RelayKey::new(self.direction, self.nonce)
    }
}

/// Status change applied by the coordinator
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: Status,
    pub dest_tx_ref: Option<String>,
    pub last_error: Option<String>,
    pub attempts: i32,
}

impl StatusUpdate {
    pub fn new(status: Status, attempts: i32) -> Self {
        Self {
            status,
            dest_tx_ref: None,
            last_error: None,
            attempts,
        }
    }

    pub fn with_tx_ref(mut self, tx_ref: impl Into<String>) -> Self {
        self.dest_tx_ref = Some(tx_ref.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

/// Record count for one (direction, status) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub direction: Direction,
    pub status: Status,
    pub count: i64,
}
