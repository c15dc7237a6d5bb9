//! # Memo Indexer
//!
//! Indexes the memo events of a single smart contract into an idempotent PostgreSQL
//! ledger and keeps live Redis aggregates (total ETH received, per-sender leaderboard).
//!
//! ## Overview
//!
//! - **Ingestion**: WebSocket session to a node, full backfill of the contract's history
//!   on every connection, then live polling of a log filter
//! - **Commit**: each event is priced from its transaction and upserted by `memo_id`;
//!   redelivery is harmless
//! - **Aggregates**: updated only when the ledger reports a first creation
//! - **Status**: human-readable progress broadcast on a log bus (and a Redis channel)
//!
//! ## Architecture
//!
//! ### Ingestion Layer
//! [`connector`] opens sessions, [`event_source`] turns them into raw logs, and
//! [`indexer`] supervises the whole thing as a reconnecting state machine.
//!
//! ### Processing Layer
//! [`event_processor`] decodes with [`contracts::MemoAbi`], commits through
//! [`ledger::Ledger`] and notifies [`stats::StatsAggregator`].
//!
//! ### Read Layer
//! [`query::QueryService`] lists memos and reports stats and store health.

// Core Types
/// Memo records and raw event types
pub mod types;
/// Error taxonomy for the pipeline
pub mod error;
/// Contract ABI handling
pub mod contracts;

// Ingestion Layer
/// Node RPC surface used by the indexer
pub mod chain_client;
/// WebSocket session establishment
pub mod connector;
/// Log filter, backfill and live polling
pub mod event_source;
/// Reconnecting session supervisor
pub mod indexer;
/// Reconnect delay policy
pub mod retry;

// Processing Layer
/// Decode, price and commit one event
pub mod event_processor;
/// Ledger trait and in-memory implementation
pub mod ledger;
/// Running totals and leaderboard
pub mod stats;
/// Best-effort status broadcast
pub mod log_bus;
/// Read-side queries
pub mod query;

// Infrastructure
/// PostgreSQL database integration
pub mod database;
/// Redis aggregate store (optional, feature-gated)
pub mod redis_manager;
/// Metrics and observability
pub mod metrics;
/// General utilities
pub mod utils;

// Settings & Configuration
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use error::IndexerError;
pub use event_processor::{EventProcessor, ProcessOutcome};
pub use indexer::{Indexer, IndexerState, IndexerStatus};
pub use ledger::{Ledger, UpsertOutcome};
pub use settings::Settings;
pub use stats::StatsAggregator;
pub use types::MemoRecord;
