//! Relay Coordinator
//!
//! Single entry point for both watchers. For every observed event it:
//! 1. Deduplicates on `(direction, nonce)` against the store and in-flight work
//! 2. Persists a `pending` record before any destination call
//! 3. Submits on a bounded per-direction pool, retrying transient failures and
//!    checking the destination's nonce state before every retry
//! 4. Marks the record `submitted`, releases its pool slot, then polls for
//!    finality
//! 5. Resolves to `confirmed` or `failed` (raising an [`Alert`])
//!
//! Cursors are only persisted once every relay registered at or before them
//! is terminal, so a restart never skips unfinished work.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::RelayerConfig;
use crate::confirmation::ConfirmationResult;
use crate::db::{NewRelayRecord, RelayRecord, RelayStore, StatusUpdate};
use crate::error::RelayError;
use crate::metrics;
use crate::types::{BridgeEvent, Cursor, Direction, RelayKey, Status};
use crate::writers::{with_retry, Destination, RetryConfig};

pub mod cursor;

pub use cursor::CursorTracker;

/// Coordinator tuning
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Concurrent submissions per direction
    pub max_concurrent: usize,
    pub retry: RetryConfig,
    pub finality_poll_interval: Duration,
    pub finality_timeout: Duration,
}

impl From<&RelayerConfig> for CoordinatorConfig {
    fn from(config: &RelayerConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_submissions,
            retry: RetryConfig {
                max_attempts: config.submit_max_attempts,
                initial_backoff: Duration::from_millis(config.submit_backoff_ms),
                ..RetryConfig::default()
            },
            finality_poll_interval: Duration::from_millis(config.finality_poll_ms),
            finality_timeout: Duration::from_secs(config.finality_timeout_secs),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&RelayerConfig::default())
    }
}

/// Raised when a relay ends `failed` and needs operator reconciliation
#[derive(Debug, Clone)]
pub struct Alert {
    pub key: RelayKey,
    pub source_tx_ref: String,
    pub dest_tx_ref: Option<String>,
    pub reason: String,
}

/// Handle on a submitted relay
#[derive(Debug, Clone)]
pub struct RelayHandle {
    key: RelayKey,
    rx: watch::Receiver<Status>,
}

impl RelayHandle {
    pub fn key(&self) -> RelayKey {
        self.key
    }

    /// Latest known status
    pub fn status(&self) -> Status {
        *self.rx.borrow()
    }

    /// Wait for a terminal status. If the relay is abandoned first (store
    /// outage or shutdown), returns the last status it reached.
    pub async fn wait(mut self) -> Status {
        loop {
            let status = *self.rx.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if self.rx.changed().await.is_err() {
                return *self.rx.borrow();
            }
        }
    }
}

enum SubmitOutcome {
    Submitted(String),
    AlreadyProcessed,
}

/// Result of the submission phase
enum Submission {
    Resolved(Status),
    Sent { tx_ref: String, attempts: i32 },
}

/// Relay Coordinator, cheap to clone
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn RelayStore>,
    to_l1: Arc<dyn Destination>,
    to_evm: Arc<dyn Destination>,
    config: CoordinatorConfig,
    /// Submission slots, one pool per direction
    to_l1_permits: Arc<Semaphore>,
    to_evm_permits: Arc<Semaphore>,
    tasks: TaskTracker,
    /// Non-terminal relays only; entries leave as soon as they resolve
    in_flight: StdMutex<HashMap<RelayKey, watch::Receiver<Status>>>,
    cursors: Mutex<HashMap<Direction, CursorTracker>>,
    alerts: mpsc::UnboundedSender<Alert>,
}

impl Coordinator {
    /// `to_l1` handles EVM → L1 relays, `to_evm` handles L1 → EVM relays
    pub fn new(
        store: Arc<dyn RelayStore>,
        to_l1: Arc<dyn Destination>,
        to_evm: Arc<dyn Destination>,
        config: CoordinatorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (alerts, alert_rx) = mpsc::unbounded_channel();
        let inner = Inner {
            store,
            to_l1,
            to_evm,
            to_l1_permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            to_evm_permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            tasks: TaskTracker::new(),
            in_flight: StdMutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            alerts,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            alert_rx,
        )
    }

    /// Offer an event. Resolved nonces return an already-resolved handle,
    /// in-flight nonces return a handle on the existing work, new nonces are
    /// persisted as `pending` and dispatched.
    pub async fn submit(
        &self,
        direction: Direction,
        event: BridgeEvent,
    ) -> Result<RelayHandle, RelayError> {
        if event.direction() != direction {
            return Err(RelayError::DirectionMismatch {
                event: event.direction(),
                requested: direction,
            });
        }

        let key = event.key();
        let status_tx = {
            let mut in_flight = self.inner.in_flight();
            if let Some(rx) = in_flight.get(&key) {
                debug!(%key, "Nonce already in flight, joining existing relay");
                metrics::record_duplicate(direction);
                return Ok(RelayHandle {
                    key,
                    rx: rx.clone(),
                });
            }
            let (tx, rx) = watch::channel(Status::Pending);
            in_flight.insert(key, rx);
            tx
        };

        let inserted = self
            .inner
            .store
            .insert_pending(&NewRelayRecord::from_event(&event))
            .await;
        let (record, created) = match inserted {
            Ok(result) => result,
            Err(e) => {
                self.inner.in_flight().remove(&key);
                return Err(RelayError::store(e));
            }
        };

        if record.status.is_terminal() {
            self.inner.in_flight().remove(&key);
            status_tx.send_replace(record.status);
            debug!(%key, status = %record.status, "Nonce already resolved, skipping");
            metrics::record_duplicate(direction);
            return Ok(RelayHandle {
                key,
                rx: status_tx.subscribe(),
            });
        }

        if created {
            info!(
                %key,
                source_tx = %record.source_tx_ref,
                amount = event.amount(),
                "Relay recorded"
            );
        } else {
            info!(%key, status = %record.status, "Resuming unfinished relay");
            status_tx.send_replace(record.status);
        }

        let handle = RelayHandle {
            key,
            rx: status_tx.subscribe(),
        };
        // Records found already in the store may have landed before a crash
        self.dispatch(record, status_tx, !created);
        Ok(handle)
    }

    /// Register a watcher position together with the relays submitted up to
    /// it. Persists the newest cursor whose relays are all terminal.
    pub async fn checkpoint(
        &self,
        direction: Direction,
        cursor: Cursor,
        keys: &[RelayKey],
    ) -> Result<(), RelayError> {
        let mut cursors = self.inner.cursors.lock().await;
        let outstanding: HashSet<u64> = {
            let in_flight = self.inner.in_flight();
            keys.iter()
                .filter(|key| key.direction == direction && in_flight.contains_key(key))
                .map(|key| key.nonce)
                .collect()
        };

        let tracker = cursors.entry(direction).or_default();
        tracker.push(cursor, outstanding);
        if let Some(ready) = tracker.take_ready() {
            self.inner
                .store
                .set_cursor(direction, &ready)
                .await
                .map_err(RelayError::store)?;
            debug!(%direction, cursor = %ready, "Cursor advanced");
            metrics::record_cursor(direction, &ready);
        }
        Ok(())
    }

    /// Last persisted cursor for a direction
    pub async fn cursor(&self, direction: Direction) -> Result<Option<Cursor>, RelayError> {
        self.inner
            .store
            .get_cursor(direction)
            .await
            .map_err(RelayError::store)
    }

    /// Resume every non-terminal record. Call once at startup, before the
    /// watchers start.
    pub async fn recover(&self) -> Result<usize, RelayError> {
        let mut resumed = 0;
        for direction in Direction::ALL {
            let records = self
                .inner
                .store
                .non_terminal_records(direction)
                .await
                .map_err(RelayError::store)?;

            for record in records {
                let key = record.key();
                let status_tx = {
                    let mut in_flight = self.inner.in_flight();
                    if in_flight.contains_key(&key) {
                        continue;
                    }
                    let (tx, rx) = watch::channel(record.status);
                    in_flight.insert(key, rx);
                    tx
                };
                info!(%key, status = %record.status, attempts = record.attempts, "Recovering relay");
                self.dispatch(record, status_tx, true);
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// Number of relays not yet terminal
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight().len()
    }

    /// Stop taking new work and wait up to `timeout` for running relays.
    /// Returns false if the timeout hit; unfinished records stay
    /// `pending`/`submitted` for the next start.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.to_l1_permits.close();
        self.inner.to_evm_permits.close();
        self.inner.tasks.close();
        info!(running = self.inner.tasks.len(), ?timeout, "Draining relay tasks");

        match tokio::time::timeout(timeout, self.inner.tasks.wait()).await {
            Ok(()) => {
                info!("All relay tasks drained");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.inner.tasks.len(),
                    "Shutdown timeout reached, unfinished relays resume on next start"
                );
                false
            }
        }
    }

    fn dispatch(&self, record: RelayRecord, status_tx: watch::Sender<Status>, check_first: bool) {
        let inner = self.inner.clone();
        let direction = record.direction;
        metrics::inc_in_flight(direction);

        self.inner.tasks.spawn(async move {
            let key = record.key();
            let status = inner.drive(&record, &status_tx, check_first).await;

            // Waiters wake only after the in-flight entry and cursor are settled
            inner.finish(key, status).await;
            status_tx.send_replace(status);
            metrics::dec_in_flight(direction);
        });
    }
}

impl Inner {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<RelayKey, watch::Receiver<Status>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn permits(&self, direction: Direction) -> &Arc<Semaphore> {
        match direction {
            Direction::EvmToL1 => &self.to_l1_permits,
            Direction::L1ToEvm => &self.to_evm_permits,
        }
    }

    fn destination(&self, direction: Direction) -> &Arc<dyn Destination> {
        match direction {
            Direction::EvmToL1 => &self.to_l1,
            Direction::L1ToEvm => &self.to_evm,
        }
    }

    async fn drive(
        &self,
        record: &RelayRecord,
        status_tx: &watch::Sender<Status>,
        check_first: bool,
    ) -> Status {
        let started = Instant::now();
        let status = match (record.status, record.dest_tx_ref.as_deref()) {
            (Status::Submitted, Some(tx_ref)) => {
                self.await_finality(record, tx_ref, record.attempts).await
            }
            _ => {
                // The slot covers submission only; finality polling runs unbounded
                let Ok(permit) = self.permits(record.direction).acquire().await else {
                    debug!(key = %record.key(), "Coordinator closed before submission");
                    return record.status;
                };
                let submission = self.submit_with_retry(record, status_tx, check_first).await;
                drop(permit);

                match submission {
                    Submission::Resolved(status) => status,
                    Submission::Sent { tx_ref, attempts } => {
                        self.await_finality(record, &tx_ref, attempts).await
                    }
                }
            }
        };

        if status.is_terminal() {
            metrics::record_terminal(record.direction, status, started.elapsed().as_secs_f64());
        }
        status
    }

    async fn submit_with_retry(
        &self,
        record: &RelayRecord,
        status_tx: &watch::Sender<Status>,
        check_first: bool,
    ) -> Submission {
        let key = record.key();
        let event = &record.event;
        let mut attempts = record.attempts;

        let result = with_retry(&self.config.retry, |attempt| {
            attempts += 1;
            let destination = self.destination(key.direction).clone();
            async move {
                if attempt > 0 || check_first {
                    if destination.is_processed(event).await? {
                        return Ok(SubmitOutcome::AlreadyProcessed);
                    }
                }
                destination.submit(event).await.map(SubmitOutcome::Submitted)
            }
        })
        .await;

        match result {
            Ok(SubmitOutcome::AlreadyProcessed) => {
                info!(%key, "Nonce already processed on destination");
                metrics::record_submission(key.direction, "already_processed");
                Submission::Resolved(
                    self.transition(key, StatusUpdate::new(Status::Confirmed, attempts), record.status)
                        .await,
                )
            }
            Ok(SubmitOutcome::Submitted(tx_ref)) => {
                metrics::record_submission(key.direction, "submitted");
                let status = self
                    .transition(
                        key,
                        StatusUpdate::new(Status::Submitted, attempts).with_tx_ref(&tx_ref),
                        record.status,
                    )
                    .await;
                if status != Status::Submitted {
                    return Submission::Resolved(status);
                }
                status_tx.send_replace(Status::Submitted);
                info!(%key, tx_ref = %tx_ref, attempts, "Relay submitted");
                Submission::Sent { tx_ref, attempts }
            }
            Err(e) => {
                metrics::record_submission(key.direction, "failed");
                Submission::Resolved(self.fail(record, attempts, record.status, None, &e).await)
            }
        }
    }

    async fn await_finality(&self, record: &RelayRecord, tx_ref: &str, attempts: i32) -> Status {
        let key = record.key();
        let destination = self.destination(key.direction);
        let deadline = Instant::now() + self.config.finality_timeout;

        loop {
            match destination.check_confirmation(tx_ref).await {
                Ok(ConfirmationResult::Confirmed) => {
                    info!(%key, tx_ref, "Relay confirmed");
                    return self
                        .transition(
                            key,
                            StatusUpdate::new(Status::Confirmed, attempts),
                            Status::Submitted,
                        )
                        .await;
                }
                Ok(ConfirmationResult::Failed(reason)) => {
                    let err = RelayError::SubmissionRejected {
                        chain: destination.chain(),
                        message: reason,
                    };
                    return self
                        .fail(record, attempts, Status::Submitted, Some(tx_ref), &err)
                        .await;
                }
                Ok(ConfirmationResult::Pending) => {
                    debug!(%key, tx_ref, "Awaiting finality");
                }
                Ok(ConfirmationResult::WaitingConfirmations(confirmations)) => {
                    debug!(%key, tx_ref, confirmations, "Awaiting confirmations");
                }
                Err(e) if e.is_retryable() => {
                    warn!(%key, tx_ref, error = %e, "Finality check failed, will poll again");
                    metrics::record_error(destination.chain(), "finality_check");
                }
                Err(e) => {
                    return self
                        .fail(record, attempts, Status::Submitted, Some(tx_ref), &e)
                        .await;
                }
            }

            if Instant::now() >= deadline {
                let err = RelayError::FinalityTimeout {
                    tx_ref: tx_ref.to_string(),
                    waited_secs: self.config.finality_timeout.as_secs(),
                };
                return self
                    .fail(record, attempts, Status::Submitted, Some(tx_ref), &err)
                    .await;
            }
            tokio::time::sleep(self.config.finality_poll_interval).await;
        }
    }

    async fn fail(
        &self,
        record: &RelayRecord,
        attempts: i32,
        current: Status,
        tx_ref: Option<&str>,
        err: &RelayError,
    ) -> Status {
        let key = record.key();
        error!(
            direction = %key.direction,
            nonce = key.nonce,
            source_tx = %record.source_tx_ref,
            dest_tx = tx_ref.unwrap_or("-"),
            attempts,
            reason = %err,
            "Relay failed, operator reconciliation required"
        );

        let status = self
            .transition(
                key,
                StatusUpdate::new(Status::Failed, attempts).with_error(err.to_string()),
                current,
            )
            .await;

        metrics::record_alert(key.direction);
        let alert = Alert {
            key,
            source_tx_ref: record.source_tx_ref.clone(),
            dest_tx_ref: tx_ref.map(str::to_string),
            reason: err.to_string(),
        };
        if self.alerts.send(alert).is_err() {
            debug!(%key, "Alert channel closed");
        }
        status
    }

    /// Persist a status change; on store failure the relay keeps `current`
    async fn transition(&self, key: RelayKey, update: StatusUpdate, current: Status) -> Status {
        match self.store.update_status(key, &update).await {
            Ok(()) => update.status,
            Err(e) => {
                error!(
                    %key,
                    from = %current,
                    to = %update.status,
                    error = %format!("{:#}", e),
                    "Failed to persist status change, relay left for recovery"
                );
                metrics::record_error("store", "status_update");
                current
            }
        }
    }

    async fn finish(&self, key: RelayKey, status: Status) {
        let mut cursors = self.cursors.lock().await;
        self.in_flight().remove(&key);

        let tracker = cursors.entry(key.direction).or_default();
        if !status.is_terminal() {
            warn!(%key, %status, "Relay stopped before reaching a terminal status, cursor held");
            tracker.stall(key.nonce);
            return;
        }

        tracker.resolve(key.nonce);
        if let Some(cursor) = tracker.take_ready() {
            match self.store.set_cursor(key.direction, &cursor).await {
                Ok(()) => {
                    debug!(direction = %key.direction, %cursor, "Cursor advanced");
                    metrics::record_cursor(key.direction, &cursor);
                }
                Err(e) => {
                    warn!(direction = %key.direction, %cursor, error = %format!("{:#}", e), "Failed to persist cursor");
                    metrics::record_error("store", "cursor");
                }
            }
        }
    }
}
