//! Relay record persistence
//!
//! [`RelayStore`] is the seam the coordinator writes through. [`PgStore`] is
//! the production implementation; [`MemoryStore`] backs tests and dry runs.

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::error;

use crate::types::{Cursor, Direction, RelayKey};

pub mod memory;
pub mod models;

pub use memory::MemoryStore;
pub use models::*;

/// Durable relay state
#[async_trait]
pub trait RelayStore: Send + Sync {
    async fn get_record(&self, key: RelayKey) -> Result<Option<RelayRecord>>;

    /// Insert a pending record unless one exists for the key. Returns the
    /// stored record and whether this call created it.
    async fn insert_pending(&self, record: &NewRelayRecord) -> Result<(RelayRecord, bool)>;

    /// Apply a forward-only status change; backward moves are rejected
    async fn update_status(&self, key: RelayKey, update: &StatusUpdate) -> Result<()>;

    /// Pending and submitted records, lowest nonce first
    async fn non_terminal_records(&self, direction: Direction) -> Result<Vec<RelayRecord>>;

    async fn failed_records(&self, limit: i64) -> Result<Vec<RelayRecord>>;

    async fn count_by_status(&self) -> Result<Vec<StatusCount>>;

    async fn get_cursor(&self, direction: Direction) -> Result<Option<Cursor>>;

    async fn set_cursor(&self, direction: Direction, cursor: &Cursor) -> Result<()>;
}

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

const RECORD_COLUMNS: &str = "direction, nonce::TEXT AS nonce, source_tx_ref, dest_tx_ref, \
     status, payload, attempts, last_error, created_at, updated_at";

/// Postgres-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn into_records(rows: Vec<RelayRecordRow>) -> Result<Vec<RelayRecord>> {
        rows.into_iter().map(RelayRecord::try_from).collect()
    }
}

#[async_trait]
impl RelayStore for PgStore {
    async fn get_record(&self, key: RelayKey) -> Result<Option<RelayRecord>> {
        let sql = format!(
            "SELECT {} FROM relay_records WHERE direction = $1 AND nonce = $2::NUMERIC",
            RECORD_COLUMNS
        );
        let row = sqlx::query_as::<_, RelayRecordRow>(&sql)
            .bind(key.direction)
            .bind(key.nonce.to_string())
            .fetch_optional(&self.pool)
            .await
            .wrap_err_with(|| format!("Failed to get relay record {}", key))?;

        row.map(RelayRecord::try_from).transpose()
    }

    async fn insert_pending(&self, record: &NewRelayRecord) -> Result<(RelayRecord, bool)> {
        let sql = format!(
            r#"INSERT INTO relay_records (direction, nonce, source_tx_ref, status, payload)
               VALUES ($1, $2::NUMERIC, $3, 'pending', $4)
               ON CONFLICT (direction, nonce) DO NOTHING
               RETURNING {}"#,
            RECORD_COLUMNS
        );
        let inserted = sqlx::query_as::<_, RelayRecordRow>(&sql)
            .bind(record.direction)
            .bind(record.nonce.to_string())
            .bind(&record.source_tx_ref)
            .bind(Json(&record.event))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("SQL error inserting relay record {}: {:?}", record.key(), e);
                e
            })
            .wrap_err("Failed to insert relay record")?;

        if let Some(row) = inserted {
            return Ok((RelayRecord::try_from(row)?, true));
        }

        let existing = self
            .get_record(record.key())
            .await?
            .ok_or_else(|| eyre!("Relay record {} vanished after conflict", record.key()))?;
        Ok((existing, false))
    }

    async fn update_status(&self, key: RelayKey, update: &StatusUpdate) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .wrap_err("Failed to begin transaction")?;

        let current: Option<crate::types::Status> = sqlx::query_scalar(
            "SELECT status FROM relay_records WHERE direction = $1 AND nonce = $2::NUMERIC FOR UPDATE",
        )
        .bind(key.direction)
        .bind(key.nonce.to_string())
        .fetch_optional(&mut *tx)
        .await
        .wrap_err("Failed to lock relay record")?;

        let current = current.ok_or_else(|| eyre!("Relay record {} not found", key))?;
        if !current.can_transition_to(update.status) {
            return Err(eyre!(
                "Refusing status change {} -> {} for {}",
                current,
                update.status,
                key
            ));
        }

        sqlx::query(
            r#"UPDATE relay_records
               SET status = $3,
                   dest_tx_ref = COALESCE($4, dest_tx_ref),
                   last_error = COALESCE($5, last_error),
                   attempts = $6,
                   updated_at = NOW()
               WHERE direction = $1 AND nonce = $2::NUMERIC"#,
        )
        .bind(key.direction)
        .bind(key.nonce.to_string())
        .bind(update.status)
        .bind(&update.dest_tx_ref)
        .bind(&update.last_error)
        .bind(update.attempts)
        .execute(&mut *tx)
        .await
        .wrap_err("Failed to update relay record status")?;

        tx.commit().await.wrap_err("Failed to commit status update")?;
        Ok(())
    }

    async fn non_terminal_records(&self, direction: Direction) -> Result<Vec<RelayRecord>> {
        let sql = format!(
            r#"SELECT {} FROM relay_records
               WHERE direction = $1 AND status IN ('pending', 'submitted')
               ORDER BY nonce ASC"#,
            RECORD_COLUMNS
        );
        let rows = sqlx::query_as::<_, RelayRecordRow>(&sql)
            .bind(direction)
            .fetch_all(&self.pool)
            .await
            .wrap_err("Failed to get non-terminal relay records")?;

        Self::into_records(rows)
    }

    async fn failed_records(&self, limit: i64) -> Result<Vec<RelayRecord>> {
        let sql = format!(
            r#"SELECT {} FROM relay_records
               WHERE status = 'failed'
               ORDER BY updated_at DESC
               LIMIT $1"#,
            RECORD_COLUMNS
        );
        let rows = sqlx::query_as::<_, RelayRecordRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .wrap_err("Failed to get failed relay records")?;

        Self::into_records(rows)
    }

    async fn count_by_status(&self) -> Result<Vec<StatusCount>> {
        let rows = sqlx::query_as::<_, (Direction, crate::types::Status, i64)>(
            "SELECT direction, status, COUNT(*) FROM relay_records GROUP BY direction, status",
        )
        .fetch_all(&self.pool)
        .await
        .wrap_err("Failed to count relay records")?;

        Ok(rows
            .into_iter()
            .map(|(direction, status, count)| StatusCount {
                direction,
                status,
                count,
            })
            .collect())
    }

    async fn get_cursor(&self, direction: Direction) -> Result<Option<Cursor>> {
        let row: Option<Json<Cursor>> =
            sqlx::query_scalar("SELECT position FROM relay_cursors WHERE direction = $1")
                .bind(direction)
                .fetch_optional(&self.pool)
                .await
                .wrap_err("Failed to get relay cursor")?;

        Ok(row.map(|json| json.0))
    }

    async fn set_cursor(&self, direction: Direction, cursor: &Cursor) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO relay_cursors (direction, position, updated_at)
               VALUES ($1, $2, NOW())
               ON CONFLICT (direction)
               DO UPDATE SET position = EXCLUDED.position, updated_at = NOW()"#,
        )
        .bind(direction)
        .bind(Json(cursor))
        .execute(&self.pool)
        .await
        .wrap_err("Failed to persist relay cursor")?;

        Ok(())
    }
}
