//! Read side: memo listing, headline stats and store health.

use log::warn;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::error::IndexerError;
use crate::ledger::Ledger;
use crate::stats::{AggregateStore, StatsAggregator, Supporter};
use crate::types::MemoRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_eth: Decimal,
    pub top_supporter: Option<Supporter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_result(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(e) => Self {
                ok: false,
                error: Some(format!("{:#}", e)),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub ledger: ComponentHealth,
    pub aggregates: ComponentHealth,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.ledger.ok && self.aggregates.ok
    }

    /// Health of stores that may not even have connected. Connected stores are pinged,
    /// a failed connection is reported as-is. Never fails.
    pub async fn check(
        ledger: anyhow::Result<Arc<dyn Ledger>>,
        aggregates: anyhow::Result<Arc<dyn AggregateStore>>,
    ) -> Self {
        let ledger = match ledger {
            Ok(ledger) => ComponentHealth::from_result(ledger.ping().await),
            Err(e) => ComponentHealth::from_result(Err(e.context("connect failed"))),
        };
        let aggregates = match aggregates {
            Ok(store) => ComponentHealth::from_result(store.ping().await),
            Err(e) => ComponentHealth::from_result(Err(e.context("connect failed"))),
        };
        Self { ledger, aggregates }.logged()
    }

    fn logged(self) -> Self {
        if !self.is_healthy() {
            warn!("⚠️ [Health] Degraded: {:?}", self);
        }
        self
    }
}

pub struct QueryService {
    ledger: Arc<dyn Ledger>,
    stats: Arc<StatsAggregator>,
}

impl QueryService {
    pub fn new(ledger: Arc<dyn Ledger>, stats: Arc<StatsAggregator>) -> Self {
        Self { ledger, stats }
    }

    /// Newest first; ties on timestamp go to the higher memo id.
    pub async fn list_memos(&self, limit: Option<usize>) -> anyhow::Result<Vec<MemoRecord>> {
        self.ledger.list_recent(limit).await
    }

    pub async fn stats(&self) -> Result<StatsSnapshot, IndexerError> {
        let total_eth = self.stats.total().await?;
        let top_supporter = self.stats.top_n(1).await?.into_iter().next();
        Ok(StatsSnapshot {
            total_eth,
            top_supporter,
        })
    }

    /// Never fails; each store reports its own status.
    pub async fn health(&self) -> HealthReport {
        HealthReport {
            ledger: ComponentHealth::from_result(self.ledger.ping().await),
            aggregates: ComponentHealth::from_result(self.stats.ping().await),
        }
        .logged()
    }
}
