//! Prometheus metrics for the bridge relayer
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

use crate::types::{Cursor, Direction, Status};

lazy_static! {
    // Watcher metrics
    pub static ref EVENTS_OBSERVED: CounterVec = register_counter_vec!(
        "relayer_events_observed_total",
        "Bridge events observed on the source chain",
        &["direction"]
    ).expect("metric definition is valid");

    pub static ref DECODE_FAILURES: CounterVec = register_counter_vec!(
        "relayer_decode_failures_total",
        "Source events skipped because they failed to decode",
        &["direction"]
    ).expect("metric definition is valid");

    pub static ref CURSOR_POSITION: GaugeVec = register_gauge_vec!(
        "relayer_cursor_block",
        "Last persisted EVM block cursor",
        &["direction"]
    ).expect("metric definition is valid");

    pub static ref CURSOR_ADVANCES: CounterVec = register_counter_vec!(
        "relayer_cursor_advances_total",
        "Number of times the persisted cursor moved forward",
        &["direction"]
    ).expect("metric definition is valid");

    // Coordinator metrics
    pub static ref DUPLICATE_EVENTS: CounterVec = register_counter_vec!(
        "relayer_duplicate_events_total",
        "Events whose nonce was already recorded",
        &["direction"]
    ).expect("metric definition is valid");

    pub static ref SUBMISSIONS: CounterVec = register_counter_vec!(
        "relayer_submissions_total",
        "Destination submissions by outcome",
        &["direction", "outcome"]
    ).expect("metric definition is valid");

    pub static ref RECORDS_TERMINAL: CounterVec = register_counter_vec!(
        "relayer_records_terminal_total",
        "Relay records reaching a terminal status",
        &["direction", "status"]
    ).expect("metric definition is valid");

    pub static ref IN_FLIGHT: GaugeVec = register_gauge_vec!(
        "relayer_in_flight",
        "Relays currently being driven",
        &["direction"]
    ).expect("metric definition is valid");

    pub static ref ALERTS: CounterVec = register_counter_vec!(
        "relayer_alerts_total",
        "Operator alerts raised for failed relays",
        &["direction"]
    ).expect("metric definition is valid");

    pub static ref RELAY_LATENCY: HistogramVec = register_histogram_vec!(
        "relayer_relay_latency_seconds",
        "Time from dispatch to terminal status",
        &["direction"],
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).expect("metric definition is valid");

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "relayer_errors_total",
        "Total number of errors",
        &["chain", "type"]
    ).expect("metric definition is valid");

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    ).expect("metric definition is valid");

    pub static ref LAST_SUCCESSFUL_POLL: GaugeVec = register_gauge_vec!(
        "relayer_last_successful_poll_timestamp",
        "Unix timestamp of last successful poll",
        &["chain"]
    ).expect("metric definition is valid");
}

pub fn record_event_observed(direction: Direction) {
    EVENTS_OBSERVED
        .with_label_values(&[direction.as_str()])
        .inc();
}

pub fn record_decode_failure(direction: Direction) {
    DECODE_FAILURES
        .with_label_values(&[direction.as_str()])
        .inc();
}

pub fn record_duplicate(direction: Direction) {
    DUPLICATE_EVENTS
        .with_label_values(&[direction.as_str()])
        .inc();
}

/// Record a submission attempt outcome (`submitted`, `already_processed`, `failed`)
pub fn record_submission(direction: Direction, outcome: &str) {
    SUBMISSIONS
        .with_label_values(&[direction.as_str(), outcome])
        .inc();
}

pub fn record_terminal(direction: Direction, status: Status, seconds: f64) {
    RECORDS_TERMINAL
        .with_label_values(&[direction.as_str(), status.as_str()])
        .inc();
    RELAY_LATENCY
        .with_label_values(&[direction.as_str()])
        .observe(seconds);
}

pub fn record_alert(direction: Direction) {
    ALERTS.with_label_values(&[direction.as_str()]).inc();
}

pub fn inc_in_flight(direction: Direction) {
    IN_FLIGHT.with_label_values(&[direction.as_str()]).inc();
}

pub fn dec_in_flight(direction: Direction) {
    IN_FLIGHT.with_label_values(&[direction.as_str()]).dec();
}

/// Record a persisted cursor
pub fn record_cursor(direction: Direction, cursor: &Cursor) {
    CURSOR_ADVANCES
        .with_label_values(&[direction.as_str()])
        .inc();
    if let Cursor::Block(block) = cursor {
        CURSOR_POSITION
            .with_label_values(&[direction.as_str()])
            .set(*block as f64);
    }
}

/// Record an error
pub fn record_error(chain: &str, error_type: &str) {
    ERRORS.with_label_values(&[chain, error_type]).inc();
}

/// Record last successful poll
pub fn record_successful_poll(chain: &str) {
    LAST_SUCCESSFUL_POLL
        .with_label_values(&[chain])
        .set(chrono::Utc::now().timestamp() as f64);
}
