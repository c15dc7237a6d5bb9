//! # Ledger
//!
//! Durable store of canonical memo records keyed by `memo_id`.
//!
//! The upsert is the single correctness mechanism against at-least-once delivery:
//! it is atomic per `memo_id` and reports whether this call created the record.
//! Aggregates are driven only by that report.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::types::MemoRecord;

/// Result of an upsert, decided atomically by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed for this `memo_id` before the call.
    Created,
    /// An existing record was overwritten in place.
    Updated,
}

impl UpsertOutcome {
    pub fn is_created(self) -> bool {
        self == UpsertOutcome::Created
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn upsert(&self, record: &MemoRecord) -> Result<UpsertOutcome>;

    async fn get(&self, memo_id: u64) -> Result<Option<MemoRecord>>;

    /// All records, newest first (`timestamp` desc, then `memo_id` desc).
    async fn list_recent(&self, limit: Option<usize>) -> Result<Vec<MemoRecord>>;

    /// Every record in creation order (`memo_id` asc). Used to rebuild aggregates.
    async fn all_records(&self) -> Result<Vec<MemoRecord>>;

    async fn count(&self) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

/// Process-local ledger backed by a `DashMap`; the entry API makes each upsert atomic
/// per key.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: DashMap<u64, MemoRecord>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn upsert(&self, record: &MemoRecord) -> Result<UpsertOutcome> {
        match self.records.entry(record.memo_id) {
            Entry::Occupied(mut existing) => {
                existing.insert(record.clone());
                Ok(UpsertOutcome::Updated)
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn get(&self, memo_id: u64) -> Result<Option<MemoRecord>> {
        Ok(self.records.get(&memo_id).map(|r| r.value().clone()))
    }

    async fn list_recent(&self, limit: Option<usize>) -> Result<Vec<MemoRecord>> {
        let mut records: Vec<MemoRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.memo_id.cmp(&a.memo_id))
        });
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn all_records(&self) -> Result<Vec<MemoRecord>> {
        let mut records: Vec<MemoRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.memo_id);
        Ok(records)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn record(id: u64, ts: i64, name: &str) -> MemoRecord {
        MemoRecord {
            memo_id: id,
            sender_address: "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".to_string(),
            name: name.to_string(),
            message: "gm".to_string(),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            eth_amount: Decimal::new(1, 3),
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.upsert(&record(1, 100, "Bob")).await.unwrap(), UpsertOutcome::Created);
        assert_eq!(ledger.upsert(&record(1, 100, "Bobby")).await.unwrap(), UpsertOutcome::Updated);

        assert_eq!(ledger.count().await.unwrap(), 1);
        assert_eq!(ledger.get(1).await.unwrap().unwrap().name, "Bobby");
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_create_once() {
        let ledger = Arc::new(MemoryLedger::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.upsert(&record(9, 100, "dup")).await.unwrap()
            }));
        }
        let mut created = 0;
        for h in handles {
            if h.await.unwrap().is_created() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(ledger.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_recent_orders_by_timestamp_desc() {
        let ledger = MemoryLedger::new();
        ledger.upsert(&record(1, 300, "c")).await.unwrap();
        ledger.upsert(&record(2, 100, "a")).await.unwrap();
        ledger.upsert(&record(3, 200, "b")).await.unwrap();
        ledger.upsert(&record(4, 300, "d")).await.unwrap();

        let ids: Vec<u64> = ledger
            .list_recent(None)
            .await
            .unwrap()
            .iter()
            .map(|r| r.memo_id)
            .collect();
        assert_eq!(ids, vec![4, 1, 3, 2]);

        assert_eq!(ledger.list_recent(Some(2)).await.unwrap().len(), 2);
        let all: Vec<u64> = ledger.all_records().await.unwrap().iter().map(|r| r.memo_id).collect();
        assert_eq!(all, vec![1, 2, 3, 4]);
    }
}
