//! # Indexer
//!
//! Session supervisor and state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Backfilling -> Polling
//!      ^              |              |            |
//!      +--------------+--------------+------------+   (session-ending error)
//! ```
//!
//! Every session starts from scratch: new connection, new log filter, full backfill
//! from the start block. Redelivered events are absorbed by the ledger upsert.
//! Reconnects are retried forever with delays from the configured [`RetryPolicy`];
//! only the shutdown future passed to [`Indexer::run`] stops the loop.

use arc_swap::ArcSwap;
use ethers::types::{Address, H256};
use log::{debug, info};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::chain_client::ChainClient;
use crate::connector::Connector;
use crate::contracts::MemoAbi;
use crate::error::IndexerError;
use crate::event_processor::EventProcessor;
use crate::event_source::EventSource;
use crate::log_bus::LogBus;
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerState {
    Disconnected,
    Connecting,
    Backfilling,
    Polling,
}

impl IndexerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexerState::Disconnected => "disconnected",
            IndexerState::Connecting => "connecting",
            IndexerState::Backfilling => "backfilling",
            IndexerState::Polling => "polling",
        }
    }

    pub fn as_gauge(&self) -> f64 {
        match self {
            IndexerState::Disconnected => 0.0,
            IndexerState::Connecting => 1.0,
            IndexerState::Backfilling => 2.0,
            IndexerState::Polling => 3.0,
        }
    }
}

impl fmt::Display for IndexerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, lock-free view of the supervisor's progress.
#[derive(Debug)]
pub struct IndexerStatus {
    state: ArcSwap<IndexerState>,
    connection_attempts: AtomicU64,
    sessions: AtomicU64,
    resubscriptions: AtomicU64,
}

impl Default for IndexerStatus {
    fn default() -> Self {
        Self {
            state: ArcSwap::from_pointee(IndexerState::Disconnected),
            connection_attempts: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
            resubscriptions: AtomicU64::new(0),
        }
    }
}

impl IndexerStatus {
    pub fn state(&self) -> IndexerState {
        **self.state.load()
    }

    fn set_state(&self, state: IndexerState) {
        let previous = *self.state.swap(Arc::new(state));
        if previous != state {
            debug!("[Indexer] {} -> {}", previous, state);
        }
        metrics::set_indexer_state(state);
    }

    pub fn connection_attempts(&self) -> u64 {
        self.connection_attempts.load(Ordering::Relaxed)
    }

    /// Sessions that got past `connect()`.
    pub fn sessions_established(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    pub fn resubscriptions(&self) -> u64 {
        self.resubscriptions.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub contract: Address,
    pub event_signature: H256,
    pub start_block: u64,
    pub backfill_chunk_size: u64,
    pub poll_interval: Duration,
    pub reconnect: RetryPolicy,
}

impl IndexerOptions {
    pub fn from_settings(settings: &Settings, abi: &MemoAbi) -> Result<Self, IndexerError> {
        Ok(Self {
            contract: settings.contract_address()?,
            event_signature: abi.signature(),
            start_block: settings.contract.start_block,
            backfill_chunk_size: settings.indexer.backfill_chunk_size,
            poll_interval: settings.indexer.poll_interval(),
            reconnect: settings.indexer.reconnect.clone(),
        })
    }
}

pub struct Indexer<C: Connector> {
    connector: C,
    processor: Arc<EventProcessor>,
    log_bus: LogBus,
    options: IndexerOptions,
    status: Arc<IndexerStatus>,
}

impl<C: Connector> Indexer<C> {
    pub fn new(
        connector: C,
        processor: Arc<EventProcessor>,
        log_bus: LogBus,
        options: IndexerOptions,
    ) -> Self {
        Self {
            connector,
            processor,
            log_bus,
            options,
            status: Arc::new(IndexerStatus::default()),
        }
    }

    pub fn status(&self) -> Arc<IndexerStatus> {
        self.status.clone()
    }

    /// Drives sessions until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => {
                info!("🛑 [Indexer] Shutdown requested");
            }
            _ = self.supervise() => {}
        }
        self.status.set_state(IndexerState::Disconnected);
        self.log_bus.info("🛑 Indexer stopped");
    }

    async fn supervise(&self) {
        let mut delays = self.options.reconnect.delays();
        loop {
            self.status.set_state(IndexerState::Connecting);
            let attempt = self.status.connection_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            self.log_bus.info(format!(
                "🔌 Connecting to {} (attempt {})",
                self.connector.describe(),
                attempt
            ));

            match self.connector.connect().await {
                Ok(client) => {
                    self.status.sessions.fetch_add(1, Ordering::Relaxed);
                    self.log_bus.success("✅ Connection established");

                    let mut reached_polling = false;
                    let e = match self.run_session(&*client, &mut reached_polling).await {
                        Ok(never) => match never {},
                        Err(e) => e,
                    };
                    if reached_polling {
                        delays = self.options.reconnect.delays();
                    }
                    self.log_bus.warning(format!("⚠️ Connection dropped: {}", e));
                }
                Err(e) => {
                    self.log_bus.error(format!("❌ Connection attempt failed: {}", e));
                }
            }

            self.status.set_state(IndexerState::Disconnected);
            metrics::record_reconnect();
            let delay = delays.next().unwrap_or(Duration::from_millis(5000));
            self.log_bus.info(format!("⏳ Reconnecting in {:?}", delay));
            tokio::time::sleep(delay).await;
        }
    }

    /// One session: subscribe, backfill, poll. Only returns on a session-ending error.
    async fn run_session(
        &self,
        client: &dyn ChainClient,
        reached_polling: &mut bool,
    ) -> Result<Infallible, IndexerError> {
        let mut source = EventSource::new(
            self.options.contract,
            self.options.event_signature,
            self.options.start_block,
            self.options.backfill_chunk_size,
        );

        let head = source.subscribe(client).await?;
        self.status.set_state(IndexerState::Backfilling);

        let ranges = source.backfill_ranges(head);
        self.log_bus.info(format!(
            "⏪ Backfilling blocks {}..={} in {} chunks",
            source.start_block(),
            head,
            ranges.len()
        ));
        let chunks = ranges.len();
        for (i, (from, to)) in ranges.into_iter().enumerate() {
            let logs = source.fetch_range(client, from, to).await?;
            let summary = self.processor.process_batch(client, &logs).await?;
            self.log_bus.info(format!(
                "📦 Backfill {}/{} (blocks {}-{}): {} events, {} new, {} dropped",
                i + 1,
                chunks,
                from,
                to,
                summary.total(),
                summary.created,
                summary.dropped
            ));
        }

        self.status.set_state(IndexerState::Polling);
        *reached_polling = true;
        self.log_bus.success(format!(
            "📡 Backfill complete, listening for new memos every {:?}",
            self.options.poll_interval
        ));

        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let batch = source.poll(client).await?;
            if batch.resubscribed {
                self.status.resubscriptions.fetch_add(1, Ordering::Relaxed);
                self.log_bus.warning(format!(
                    "🔁 Log filter recreated, recovered {} events since block {}",
                    batch.logs.len(),
                    source.checkpoint().unwrap_or(self.options.start_block)
                ));
            }
            metrics::record_poll_batch(batch.logs.len());
            if batch.logs.is_empty() {
                continue;
            }
            let summary = self.processor.process_batch(client, &batch.logs).await?;
            debug!(
                "[Indexer] Poll batch: {} created, {} updated, {} dropped",
                summary.created, summary.updated, summary.dropped
            );
        }
    }
}
