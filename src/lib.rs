//! Bridge relayer library
//!
//! Watches the EVM bridge for burns and the L1 bridge object for locks, and
//! relays each one exactly once to the opposite chain.

pub mod api;
pub mod config;
pub mod confirmation;
pub mod contracts;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod l1_client;
pub mod metrics;
pub mod types;
pub mod watchers;
pub mod writers;
