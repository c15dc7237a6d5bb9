// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {
    Count,
    Milliseconds,
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter,
};

use crate::indexer::IndexerState;

/// Registers descriptions for every indexer metric. Call once at startup.
pub fn describe_metrics() {
    describe_gauge!("memo_indexer_up", "Indexer process liveness (1=up).");
    describe_gauge!(
        "memo_indexer_state",
        "Current indexer state (0=disconnected, 1=connecting, 2=backfilling, 3=polling)."
    );

    describe_counter!(
        "memo_indexer_memos_created_total",
        Unit::Count,
        "Memos committed to the ledger for the first time."
    );
    describe_counter!(
        "memo_indexer_memos_updated_total",
        Unit::Count,
        "Redelivered memos that overwrote an existing ledger record."
    );
    describe_counter!(
        "memo_indexer_events_dropped_total",
        Unit::Count,
        "Events dropped by the processor, labeled by reason."
    );
    describe_counter!(
        "memo_indexer_aggregate_errors_total",
        Unit::Count,
        "Aggregate store failures after a successful ledger commit."
    );
    describe_counter!(
        "memo_indexer_reconnects_total",
        Unit::Count,
        "Sessions torn down and scheduled for reconnection."
    );
    describe_counter!(
        "memo_indexer_resubscriptions_total",
        Unit::Count,
        "Log filters recreated after the node forgot them."
    );
    describe_counter!(
        "memo_indexer_backfill_logs_total",
        Unit::Count,
        "Historical logs fetched during backfill and gap-fill."
    );

    describe_histogram!(
        "memo_indexer_poll_batch_size",
        "Number of logs returned by one filter poll."
    );
    describe_histogram!(
        "memo_indexer_process_ms",
        Unit::Milliseconds,
        "Per-event processing latency (decode, tx lookup, upsert) in milliseconds."
    );
}

pub fn set_up() {
    gauge!("memo_indexer_up", 1.0);
}

pub fn set_indexer_state(state: IndexerState) {
    gauge!("memo_indexer_state", state.as_gauge());
}

pub fn record_memo_created() {
    increment_counter!("memo_indexer_memos_created_total");
}

pub fn record_memo_updated() {
    increment_counter!("memo_indexer_memos_updated_total");
}

/// `reason` is a low-cardinality label such as `decode` or `missing_tx`.
pub fn record_event_dropped(reason: &'static str) {
    increment_counter!("memo_indexer_events_dropped_total", "reason" => reason);
}

pub fn record_aggregate_error() {
    increment_counter!("memo_indexer_aggregate_errors_total");
}

pub fn record_reconnect() {
    increment_counter!("memo_indexer_reconnects_total");
}

pub fn record_resubscription() {
    increment_counter!("memo_indexer_resubscriptions_total");
}

pub fn record_backfill_logs(count: usize) {
    counter!("memo_indexer_backfill_logs_total", count as u64);
}

pub fn record_poll_batch(size: usize) {
    histogram!("memo_indexer_poll_batch_size", size as f64);
}

pub fn record_process_latency_ms(ms: f64) {
    histogram!("memo_indexer_process_ms", ms);
}

/// Installs the Prometheus exporter on `0.0.0.0:port`.
#[cfg(feature = "observability")]
pub fn install_prometheus_exporter(port: u16) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::SocketAddr;

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;
    describe_metrics();
    set_up();
    log::info!("📊 Prometheus metrics exposed on {}", addr);
    Ok(())
}
