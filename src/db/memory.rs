use async_trait::async_trait;
use chrono::Utc;
use eyre::{eyre, Result};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::{NewRelayRecord, RelayRecord, RelayStore, StatusCount, StatusUpdate};
use crate::types::{Cursor, Direction, RelayKey, Status};

#[derive(Default)]
struct State {
    records: BTreeMap<(Direction, u64), RelayRecord>,
    cursors: HashMap<Direction, Cursor>,
}

/// In-process store with the same transition rules as [`super::PgStore`]
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, ordered by direction then nonce
    pub async fn records(&self) -> Vec<RelayRecord> {
        self.state.lock().await.records.values().cloned().collect()
    }
}

#[async_trait]
impl RelayStore for MemoryStore {
    async fn get_record(&self, key: RelayKey) -> Result<Option<RelayRecord>> {
        let state = self.state.lock().await;
        Ok(state.records.get(&(key.direction, key.nonce)).cloned())
    }

    async fn insert_pending(&self, record: &NewRelayRecord) -> Result<(RelayRecord, bool)> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.records.get(&(record.direction, record.nonce)) {
            return Ok((existing.clone(), false));
        }

        let now = Utc::now();
        let stored = RelayRecord {
            direction: record.direction,
            nonce: record.nonce,
            source_tx_ref: record.source_tx_ref.clone(),
            dest_tx_ref: None,
            status: Status::Pending,
            event: record.event.clone(),
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        state
            .records
            .insert((record.direction, record.nonce), stored.clone());
        Ok((stored, true))
    }

    async fn update_status(&self, key: RelayKey, update: &StatusUpdate) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .get_mut(&(key.direction, key.nonce))
            .ok_or_else(|| eyre!("Relay record {} not found", key))?;

        if !record.status.can_transition_to(update.status) {
            return Err(eyre!(
                "Refusing status change {} -> {} for {}",
                record.status,
                update.status,
                key
            ));
        }

        record.status = update.status;
        if update.dest_tx_ref.is_some() {
            record.dest_tx_ref = update.dest_tx_ref.clone();
        }
        if update.last_error.is_some() {
            record.last_error = update.last_error.clone();
        }
        record.attempts = update.attempts;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn non_terminal_records(&self, direction: Direction) -> Result<Vec<RelayRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.direction == direction && !r.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn failed_records(&self, limit: i64) -> Result<Vec<RelayRecord>> {
        let state = self.state.lock().await;
        let mut failed: Vec<RelayRecord> = state
            .records
            .values()
            .filter(|r| r.status == Status::Failed)
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        failed.truncate(limit.max(0) as usize);
        Ok(failed)
    }

    async fn count_by_status(&self) -> Result<Vec<StatusCount>> {
        let state = self.state.lock().await;
        let mut counts: BTreeMap<(&'static str, &'static str), StatusCount> = BTreeMap::new();
        for record in state.records.values() {
            counts
                .entry((record.direction.as_str(), record.status.as_str()))
                .or_insert(StatusCount {
                    direction: record.direction,
                    status: record.status,
                    count: 0,
                })
                .count += 1;
        }
        Ok(counts.into_values().collect())
    }

    async fn get_cursor(&self, direction: Direction) -> Result<Option<Cursor>> {
        Ok(self.state.lock().await.cursors.get(&direction).cloned())
    }

    async fn set_cursor(&self, direction: Direction, cursor: &Cursor) -> Result<()> {
        self.state
            .lock()
            .await
            .cursors
            .insert(direction, cursor.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BridgeEvent, BurnEvent, EvmAddress, L1Address};

    fn burn(nonce: u64) -> NewRelayRecord {
        NewRelayRecord::from_event(&BridgeEvent::Burn(BurnEvent {
            sender: EvmAddress([0xaa; 20]),
            recipient_l1: L1Address([0x11; 32]),
            token_type: 1,
            amount: 500_000,
            nonce,
            source_tx_hash: [0xde; 32],
            block_number: 100,
        }))
    }

    #[tokio::test]
    async fn test_insert_pending_is_idempotent() {
        let store = MemoryStore::new();
        let (first, created) = store.insert_pending(&burn(7)).await.unwrap();
        assert!(created);
        assert_eq!(first.status, Status::Pending);

        let (second, created) = store.insert_pending(&burn(7)).await.unwrap();
        assert!(!created);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(store.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_status_moves_forward_only() {
        let store = MemoryStore::new();
        let key = burn(1).key();
        store.insert_pending(&burn(1)).await.unwrap();

        store
            .update_status(key, &StatusUpdate::new(Status::Submitted, 1).with_tx_ref("D1"))
            .await
            .unwrap();
        store
            .update_status(key, &StatusUpdate::new(Status::Confirmed, 1))
            .await
            .unwrap();

        let err = store
            .update_status(key, &StatusUpdate::new(Status::Pending, 1))
            .await;
        assert!(err.is_err());

        let record = store.get_record(key).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Confirmed);
        assert_eq!(record.dest_tx_ref.as_deref(), Some("D1"));
    }

    #[tokio::test]
    async fn test_non_terminal_and_counts() {
        let store = MemoryStore::new();
        for nonce in [3, 1, 2] {
            store.insert_pending(&burn(nonce)).await.unwrap();
        }
        store
            .update_status(burn(2).key(), &StatusUpdate::new(Status::Failed, 3).with_error("x"))
            .await
            .unwrap();

        let open: Vec<u64> = store
            .non_terminal_records(Direction::EvmToL1)
            .await
            .unwrap()
            .iter()
            .map(|r| r.nonce)
            .collect();
        assert_eq!(open, vec![1, 3]);
        assert!(store
            .non_terminal_records(Direction::L1ToEvm)
            .await
            .unwrap()
            .is_empty());

        let counts = store.count_by_status().await.unwrap();
        let failed = counts.iter().find(|c| c.status == Status::Failed).unwrap();
        assert_eq!(failed.count, 1);
        assert_eq!(store.failed_records(10).await.unwrap().len(), 1);
    }
}
