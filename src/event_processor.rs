//! # Event Processor
//!
//! Turns one raw log into a canonical [`MemoRecord`], commits it to the ledger and,
//! only when the ledger reports a first creation, feeds the aggregates and announces
//! it on the log bus.
//!
//! Per-event failures are contained here: the event is dropped, logged and counted,
//! and the batch continues. Only connectivity errors escape, since they end the session.

use ethers::types::Log;
use log::{debug, error};
use std::sync::Arc;
use std::time::Instant;

use crate::chain_client::ChainClient;
use crate::contracts::MemoAbi;
use crate::error::IndexerError;
use crate::ledger::{Ledger, UpsertOutcome};
use crate::log_bus::LogBus;
use crate::metrics;
use crate::stats::StatsAggregator;
use crate::types::conversions::u256_to_u64;
use crate::types::MemoRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Created(MemoRecord),
    Updated(MemoRecord),
    Dropped,
}

pub struct EventProcessor {
    abi: Arc<MemoAbi>,
    ledger: Arc<dyn Ledger>,
    stats: Arc<StatsAggregator>,
    log_bus: LogBus,
}

impl EventProcessor {
    pub fn new(
        abi: Arc<MemoAbi>,
        ledger: Arc<dyn Ledger>,
        stats: Arc<StatsAggregator>,
        log_bus: LogBus,
    ) -> Self {
        Self {
            abi,
            ledger,
            stats,
            log_bus,
        }
    }

    /// Decode, price and upsert. No side effects beyond the ledger write.
    pub async fn commit(
        &self,
        client: &dyn ChainClient,
        log: &Log,
    ) -> Result<(MemoRecord, UpsertOutcome), IndexerError> {
        let event = self.abi.decode(log)?;
        let memo_id = u256_to_u64(event.id).ok();

        let tx_hash = event
            .tx_hash
            .ok_or_else(|| IndexerError::processing(memo_id, "log has no transaction hash"))?;
        let value = client.transaction_value(tx_hash).await.map_err(|e| match e {
            IndexerError::Processing { reason, .. } => IndexerError::processing(memo_id, reason),
            other => other,
        })?;

        let record = MemoRecord::from_event(&event, value)
            .map_err(|e| IndexerError::processing(memo_id, e.to_string()))?;

        let outcome = self.ledger.upsert(&record).await.map_err(|e| {
            IndexerError::processing(Some(record.memo_id), format!("ledger upsert failed: {:#}", e))
        })?;
        Ok((record, outcome))
    }

    /// Full pipeline for one log. `Err` is always a connectivity error.
    pub async fn process(
        &self,
        client: &dyn ChainClient,
        log: &Log,
    ) -> Result<ProcessOutcome, IndexerError> {
        let started = Instant::now();
        let result = self.commit(client, log).await;
        metrics::record_process_latency_ms(started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok((record, UpsertOutcome::Created)) => {
                metrics::record_memo_created();
                if let Err(e) = self.stats.on_created(&record).await {
                    metrics::record_aggregate_error();
                    error!(
                        "❌ [Processor] Memo #{} committed but aggregates not updated: {}",
                        record.memo_id, e
                    );
                }
                self.log_bus.success(format!(
                    "✅ Indexed memo #{} from {} ({} ETH): {}",
                    record.memo_id, record.sender_address, record.eth_amount, record.name
                ));
                Ok(ProcessOutcome::Created(record))
            }
            Ok((record, UpsertOutcome::Updated)) => {
                metrics::record_memo_updated();
                self.stats.on_updated(&record).await;
                debug!("[Processor] Memo #{} already indexed, refreshed", record.memo_id);
                Ok(ProcessOutcome::Updated(record))
            }
            Err(e) if e.is_connectivity() => Err(e),
            Err(e) => {
                metrics::record_event_dropped(drop_reason(&e));
                self.log_bus
                    .error(format!("❌ [Processor] Dropped event: {}", e));
                Ok(ProcessOutcome::Dropped)
            }
        }
    }

    /// Processes a batch sequentially in the order given.
    pub async fn process_batch(
        &self,
        client: &dyn ChainClient,
        logs: &[Log],
    ) -> Result<BatchSummary, IndexerError> {
        let mut summary = BatchSummary::default();
        for log in logs {
            match self.process(client, log).await? {
                ProcessOutcome::Created(_) => summary.created += 1,
                ProcessOutcome::Updated(_) => summary.updated += 1,
                ProcessOutcome::Dropped => summary.dropped += 1,
            }
        }
        Ok(summary)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub created: usize,
    pub updated: usize,
    pub dropped: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.dropped
    }
}

fn drop_reason(err: &IndexerError) -> &'static str {
    match err {
        IndexerError::Processing { reason, .. } if reason.contains("not found") => "missing_tx",
        IndexerError::Processing { reason, .. } if reason.contains("ledger") => "ledger",
        IndexerError::Processing { .. } => "decode",
        IndexerError::Subscription(_) => "subscription",
        _ => "other",
    }
}
