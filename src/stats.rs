//! # Stats Aggregator
//!
//! Derived, non-authoritative aggregates: running `total_eth` and a per-sender
//! leaderboard. Both only ever grow from first-creation reports of the ledger, so they
//! can always be rebuilt by replaying the ledger (see [`StatsAggregator::rebuild_from_ledger`]).
//!
//! Ranking is descending by amount; equal amounts are ordered by sender address
//! ascending so `top_n` is deterministic.
//!
//! Precision depends on the store. [`MemoryAggregateStore`] sums `Decimal`s exactly.
//! Redis keeps totals and scores as doubles, so sums there are approximate past ~15
//! significant digits (`1.5 + 1e-18` reads back as `1.5`). Exact amounts always live in
//! the ledger (`NUMERIC(38,18)`).

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::IndexerError;
use crate::ledger::Ledger;
use crate::types::MemoRecord;

/// Key-value backend for aggregates (Redis in production). Implementations may round
/// sums to their native numeric type.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn add_to_total(&self, amount: Decimal) -> Result<()>;

    async fn add_to_sender(&self, sender: &str, amount: Decimal) -> Result<()>;

    async fn total(&self) -> Result<Decimal>;

    async fn sender_total(&self, sender: &str) -> Result<Option<Decimal>>;

    /// The `k` highest-scoring senders plus any others tied with the k-th score,
    /// in no particular order. Ranking is applied by the caller.
    async fn top_candidates(&self, k: usize) -> Result<Vec<(String, Decimal)>>;

    /// Clears total and leaderboard.
    async fn reset(&self) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

/// Exact in-process store, used by tests and when Redis is disabled.
#[derive(Debug, Default)]
pub struct MemoryAggregateStore {
    inner: Mutex<MemoryAggregates>,
}

#[derive(Debug, Default)]
struct MemoryAggregates {
    total: Decimal,
    leaderboard: HashMap<String, Decimal>,
}

impl MemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AggregateStore for MemoryAggregateStore {
    async fn add_to_total(&self, amount: Decimal) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.total = inner
            .total
            .checked_add(amount)
            .ok_or_else(|| anyhow::anyhow!("total_eth overflow"))?;
        Ok(())
    }

    async fn add_to_sender(&self, sender: &str, amount: Decimal) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner.leaderboard.entry(sender.to_string()).or_default();
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| anyhow::anyhow!("leaderboard overflow for {}", sender))?;
        Ok(())
    }

    async fn total(&self) -> Result<Decimal> {
        Ok(self.inner.lock().await.total)
    }

    async fn sender_total(&self, sender: &str) -> Result<Option<Decimal>> {
        Ok(self.inner.lock().await.leaderboard.get(sender).copied())
    }

    async fn top_candidates(&self, _k: usize) -> Result<Vec<(String, Decimal)>> {
        Ok(self
            .inner
            .lock()
            .await
            .leaderboard
            .iter()
            .map(|(s, a)| (s.clone(), *a))
            .collect())
    }

    async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.total = Decimal::ZERO;
        inner.leaderboard.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Supporter {
    pub sender_address: String,
    pub eth_amount: Decimal,
}

/// Descending by amount, then ascending by address.
pub fn rank(mut entries: Vec<(String, Decimal)>, k: usize) -> Vec<Supporter> {
    entries.sort_by(|(sa, aa), (sb, ab)| match ab.cmp(aa) {
        Ordering::Equal => sa.cmp(sb),
        other => other,
    });
    entries
        .into_iter()
        .take(k)
        .map(|(sender_address, eth_amount)| Supporter {
            sender_address,
            eth_amount,
        })
        .collect()
}

pub struct StatsAggregator {
    store: Arc<dyn AggregateStore>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    /// Adds the record's amount to the total and to its sender. Call only on first
    /// creation; a crash between ledger write and this call under-counts until rebuild.
    pub async fn on_created(&self, record: &MemoRecord) -> Result<(), IndexerError> {
        self.store
            .add_to_total(record.eth_amount)
            .await
            .map_err(|e| IndexerError::AggregateStore(format!("total_eth: {:#}", e)))?;
        self.store
            .add_to_sender(&record.sender_address, record.eth_amount)
            .await
            .map_err(|e| {
                IndexerError::AggregateStore(format!("leaderboard[{}]: {:#}", record.sender_address, e))
            })?;
        Ok(())
    }

    /// Aggregates never change on update.
    pub async fn on_updated(&self, record: &MemoRecord) {
        debug!("[Stats] Memo #{} redelivered, aggregates unchanged", record.memo_id);
    }

    pub async fn top_n(&self, k: usize) -> Result<Vec<Supporter>, IndexerError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let candidates = self
            .store
            .top_candidates(k)
            .await
            .map_err(|e| IndexerError::AggregateStore(format!("{:#}", e)))?;
        Ok(rank(candidates, k))
    }

    pub async fn total(&self) -> Result<Decimal, IndexerError> {
        self.store
            .total()
            .await
            .map_err(|e| IndexerError::AggregateStore(format!("{:#}", e)))
    }

    pub async fn sender_total(&self, sender: &str) -> Result<Decimal, IndexerError> {
        self.store
            .sender_total(sender)
            .await
            .map(|v| v.unwrap_or(Decimal::ZERO))
            .map_err(|e| IndexerError::AggregateStore(format!("{:#}", e)))
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }

    /// Manual reconciliation: reset, then replay every ledger record as a creation.
    /// Must not run while an indexer is writing.
    pub async fn rebuild_from_ledger(&self, ledger: &dyn Ledger) -> Result<u64> {
        let records = ledger.all_records().await?;
        warn!("♻️ [Stats] Rebuilding aggregates from {} ledger records", records.len());
        self.store.reset().await?;
        for record in &records {
            self.on_created(record).await?;
        }
        info!("✅ [Stats] Rebuild complete, total_eth = {}", self.total().await?);
        Ok(records.len() as u64)
    }
}
