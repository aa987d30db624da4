//! Health & Status API endpoints
//!
//! - GET /health - Simple health check
//! - GET /metrics - Prometheus metrics
//! - GET /status - Record counts, cursors, uptime
//! - GET /failed - Records awaiting manual reconciliation

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::{Result, WrapErr};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::coordinator::Coordinator;
use crate::db::{RelayRecord, RelayStore};
use crate::metrics;
use crate::types::Direction;

const FAILED_LIMIT: i64 = 100;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RelayStore>,
    pub coordinator: Coordinator,
    pub started_at: Instant,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub in_flight: usize,
    /// direction → status → count
    pub records: BTreeMap<String, BTreeMap<String, i64>>,
    /// direction → persisted cursor
    pub cursors: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Serialize)]
pub struct FailedResponse {
    pub failed: Vec<FailedInfo>,
}

#[derive(Debug, Serialize)]
pub struct FailedInfo {
    pub direction: Direction,
    pub nonce: String,
    pub source_tx_ref: String,
    pub dest_tx_ref: Option<String>,
    pub amount: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub updated_at: String,
}

impl From<RelayRecord> for FailedInfo {
    fn from(record: RelayRecord) -> Self {
        Self {
            direction: record.direction,
            nonce: record.nonce.to_string(),
            amount: record.event.amount().to_string(),
            source_tx_ref: record.source_tx_ref,
            dest_tx_ref: record.dest_tx_ref,
            attempts: record.attempts,
            last_error: record.last_error,
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/status", get(status))
        .route("/failed", get(failed))
        .with_state(state)
}

/// Serve the API until `cancel` fires
pub async fn start_api_server(
    bind_address: &str,
    state: AppState,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .wrap_err_with(|| format!("Failed to bind API server to {}", bind_address))?;
    info!(addr = %bind_address, "API server started");

    metrics::UP.set(1.0);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .wrap_err("API server failed")?;

    metrics::UP.set(0.0);
    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(
        build_status(
            state.store.as_ref(),
            state.coordinator.in_flight(),
            state.started_at.elapsed().as_secs(),
        )
        .await,
    )
}

async fn failed(State(state): State<AppState>) -> Json<FailedResponse> {
    Json(build_failed(state.store.as_ref()).await)
}

pub async fn build_status(
    store: &dyn RelayStore,
    in_flight: usize,
    uptime_seconds: u64,
) -> StatusResponse {
    let mut records: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
    match store.count_by_status().await {
        Ok(counts) => {
            for count in counts {
                records
                    .entry(count.direction.to_string())
                    .or_default()
                    .insert(count.status.to_string(), count.count);
            }
        }
        Err(e) => warn!(error = %e, "Failed to count relay records"),
    }

    let mut cursors = BTreeMap::new();
    for direction in Direction::ALL {
        let cursor = match store.get_cursor(direction).await {
            Ok(cursor) => cursor.map(|c| c.to_string()),
            Err(e) => {
                warn!(%direction, error = %e, "Failed to read cursor");
                None
            }
        };
        cursors.insert(direction.to_string(), cursor);
    }

    StatusResponse {
        status: "ok".to_string(),
        uptime_seconds,
        in_flight,
        records,
        cursors,
    }
}

pub async fn build_failed(store: &dyn RelayStore) -> FailedResponse {
    let failed = store
        .failed_records(FAILED_LIMIT)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to list failed relay records");
            Vec::new()
        })
        .into_iter()
        .map(FailedInfo::from)
        .collect();

    FailedResponse { failed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, NewRelayRecord, StatusUpdate};
    use crate::types::{BridgeEvent, BurnEvent, Cursor, EvmAddress, L1Address, RelayKey, Status};

    fn burn(nonce: u64) -> NewRelayRecord {
        NewRelayRecord::from_event(&BridgeEvent::Burn(BurnEvent {
            sender: EvmAddress([0xaa; 20]),
            recipient_l1: L1Address([0x11; 32]),
            token_type: 1,
            amount: 250,
            nonce,
            source_tx_hash: [0xde; 32],
            block_number: 9,
        }))
    }

    #[tokio::test]
    async fn test_build_status_reports_counts_and_cursors() {
        let store = MemoryStore::new();
        store.insert_pending(&burn(1)).await.unwrap();
        store.insert_pending(&burn(2)).await.unwrap();
        store
            .update_status(
                RelayKey::new(Direction::EvmToL1, 2),
                &StatusUpdate::new(Status::Failed, 3).with_error("rejected"),
            )
            .await
            .unwrap();
        store
            .set_cursor(Direction::EvmToL1, &Cursor::Block(9))
            .await
            .unwrap();

        let status = build_status(&store, 1, 42).await;
        assert_eq!(status.uptime_seconds, 42);
        assert_eq!(status.in_flight, 1);
        assert_eq!(status.records["evm_to_l1"]["pending"], 1);
        assert_eq!(status.records["evm_to_l1"]["failed"], 1);
        assert_eq!(status.cursors["evm_to_l1"].as_deref(), Some("block:9"));
        assert_eq!(status.cursors["l1_to_evm"], None);
    }

    #[tokio::test]
    async fn test_build_failed_lists_failed_records() {
        let store = MemoryStore::new();
        store.insert_pending(&burn(5)).await.unwrap();
        store
            .update_status(
                RelayKey::new(Direction::EvmToL1, 5),
                &StatusUpdate::new(Status::Failed, 3).with_error("finality timeout"),
            )
            .await
            .unwrap();

        let failed = build_failed(&store).await.failed;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].nonce, "5");
        assert_eq!(failed[0].amount, "250");
        assert_eq!(failed[0].last_error.as_deref(), Some("finality timeout"));
    }
}
