// Redis Manager - aggregate store and log channel for the memo indexer
// total_eth is a plain string key (INCRBYFLOAT), the leaderboard a sorted set (ZINCRBY)
// Both are stored by Redis as doubles: sums are approximate, the ledger holds exact amounts.

#[cfg(feature = "redis")]
use anyhow::{Context, Result};
#[cfg(feature = "redis")]
use async_trait::async_trait;
#[cfg(feature = "redis")]
use log::{debug, info};
#[cfg(feature = "redis")]
use redis::aio::ConnectionManager;
#[cfg(feature = "redis")]
use redis::{AsyncCommands, Client};
#[cfg(feature = "redis")]
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;

use crate::log_bus::LogBus;
use crate::stats::{AggregateStore, MemoryAggregateStore};

/// Configuration for the Redis connection and key layout.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_total_key")]
    pub total_key: String,
    #[serde(default = "default_leaderboard_key")]
    pub leaderboard_key: String,
    #[serde(default = "default_log_channel")]
    pub log_channel: String,
}

fn default_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_total_key() -> String {
    "stats:total_eth".to_string()
}
fn default_leaderboard_key() -> String {
    "stats:leaderboard".to_string()
}
fn default_log_channel() -> String {
    "indexer:logs".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            total_key: default_total_key(),
            leaderboard_key: default_leaderboard_key(),
            log_channel: default_log_channel(),
        }
    }
}

/// Redis client handle. Cheap to clone; all clones share one managed connection.
#[cfg(feature = "redis")]
#[derive(Clone)]
pub struct RedisManager {
    conn: ConnectionManager,
    config: RedisConfig,
}

#[cfg(feature = "redis")]
impl RedisManager {
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("✅ Redis Manager connected to {}", config.url);

        Ok(Self { conn, config })
    }

    /// Create with default localhost config
    pub async fn new_default() -> Result<Self> {
        Self::new(RedisConfig::default()).await
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// PUBLISH to a named channel; returns the number of receivers.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .with_context(|| format!("Failed to PUBLISH to {}", channel))?;
        Ok(receivers)
    }

    // ==================== HEALTH CHECK ====================

    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;

        if pong == "PONG" {
            Ok(())
        } else {
            anyhow::bail!("Unexpected Redis response: {}", pong)
        }
    }
}

/// Aggregate store plus a log bus wired to the same backend. An unreachable Redis is not
/// fatal: aggregates fall back to process-local and the bus stays in-process.
#[cfg(feature = "redis")]
pub async fn connect_aggregates(config: &RedisConfig, log_bus_capacity: usize) -> (Arc<dyn AggregateStore>, LogBus) {
    match RedisManager::new(config.clone()).await {
        Ok(redis) => {
            let log_bus = LogBus::new(log_bus_capacity).with_redis(redis.clone(), config.log_channel.clone());
            (Arc::new(redis), log_bus)
        }
        Err(e) => {
            let log_bus = LogBus::new(log_bus_capacity);
            log_bus.warning(format!(
                "⚠️ Redis unavailable ({:#}), continuing without Redis: aggregates are process-local",
                e
            ));
            (Arc::new(MemoryAggregateStore::new()), log_bus)
        }
    }
}

#[cfg(not(feature = "redis"))]
pub async fn connect_aggregates(_config: &RedisConfig, log_bus_capacity: usize) -> (Arc<dyn AggregateStore>, LogBus) {
    let log_bus = LogBus::new(log_bus_capacity);
    log_bus.warning("⚠️ Built without the `redis` feature: aggregates are process-local");
    (Arc::new(MemoryAggregateStore::new()), log_bus)
}

/// Parses a Redis float reply. INCRBYFLOAT answers in plain notation, sorted-set scores
/// may come back as `1e+20` style doubles.
#[cfg(feature = "redis")]
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    use std::str::FromStr;
    if let Ok(d) = Decimal::from_str(raw) {
        return Ok(d);
    }
    let float: f64 = raw
        .parse()
        .with_context(|| format!("Invalid numeric reply {:?}", raw))?;
    Decimal::try_from(float).with_context(|| format!("Numeric reply out of range {:?}", raw))
}

#[cfg(feature = "redis")]
#[async_trait]
impl AggregateStore for RedisManager {
    async fn add_to_total(&self, amount: Decimal) -> Result<()> {
        let mut conn = self.conn.clone();
        // exact on the wire, rounded to a double by Redis
        let new_total: String = redis::cmd("INCRBYFLOAT")
            .arg(&self.config.total_key)
            .arg(amount.to_string())
            .query_async(&mut conn)
            .await
            .context("Failed to INCRBYFLOAT total")?;
        debug!("💾 total_eth = {}", new_total);
        Ok(())
    }

    async fn add_to_sender(&self, sender: &str, amount: Decimal) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("ZINCRBY")
            .arg(&self.config.leaderboard_key)
            .arg(amount.to_string())
            .arg(sender)
            .query_async(&mut conn)
            .await
            .context("Failed to ZINCRBY leaderboard")?;
        Ok(())
    }

    async fn total(&self) -> Result<Decimal> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(&self.config.total_key)
            .await
            .context("Failed to GET total")?;
        raw.as_deref().map(parse_amount).unwrap_or(Ok(Decimal::ZERO))
    }

    async fn sender_total(&self, sender: &str) -> Result<Option<Decimal>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .zscore(&self.config.leaderboard_key, sender)
            .await
            .context("Failed to ZSCORE leaderboard")?;
        raw.as_deref().map(parse_amount).transpose()
    }

    async fn top_candidates(&self, k: usize) -> Result<Vec<(String, Decimal)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let head: Vec<(String, String)> = conn
            .zrevrange_withscores(&self.config.leaderboard_key, 0, (k - 1) as isize)
            .await
            .context("Failed to ZREVRANGE leaderboard")?;

        // Redis breaks score ties by member descending; widen to every member tied with
        // the k-th score so the caller's ordering decides who makes the cut.
        let kth_score = if head.len() == k {
            head.last().map(|(_, score)| score.clone())
        } else {
            None
        };
        let rows: Vec<(String, String)> = match kth_score {
            Some(score) => conn
                .zrevrangebyscore_withscores(&self.config.leaderboard_key, "+inf", score)
                .await
                .context("Failed to ZREVRANGEBYSCORE leaderboard")?,
            None => head,
        };

        rows.into_iter()
            .map(|(member, score)| Ok((member, parse_amount(&score)?)))
            .collect()
    }

    async fn reset(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(vec![self.config.total_key.as_str(), self.config.leaderboard_key.as_str()])
            .await
            .context("Failed to reset aggregates")?;
        info!("🗑️  Cleared aggregate keys");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.health_check().await
    }
}

#[cfg(all(test, feature = "redis"))]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1.5").unwrap(), Decimal::from_str("1.5").unwrap());
        assert_eq!(parse_amount("3").unwrap(), Decimal::from(3));
        assert_eq!(parse_amount("1e+20").unwrap(), Decimal::from_str("100000000000000000000").unwrap());
        assert!(parse_amount("nan-ish").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_redis_falls_back_to_local_aggregates() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".into(),
            ..RedisConfig::default()
        };
        let (store, log_bus) = connect_aggregates(&config, 16).await;
        assert!(!log_bus.is_forwarding());

        store.add_to_total(Decimal::from(2)).await.unwrap();
        store.add_to_sender("0xA", Decimal::from(2)).await.unwrap();
        assert_eq!(store.total().await.unwrap(), Decimal::from(2));
        assert!(store.ping().await.is_ok());

        let mut rx = log_bus.subscribe();
        log_bus.info("still indexing");
        assert_eq!(rx.recv().await.unwrap().message, "still indexing");
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_redis_aggregates_roundtrip() {
        let config = RedisConfig {
            total_key: "test:memo:total".into(),
            leaderboard_key: "test:memo:leaderboard".into(),
            ..RedisConfig::default()
        };
        let manager = RedisManager::new(config).await.unwrap();
        manager.reset().await.unwrap();

        manager.add_to_total(Decimal::from_str("1.5").unwrap()).await.unwrap();
        manager.add_to_total(Decimal::from_str("0.5").unwrap()).await.unwrap();
        manager.add_to_sender("0xB", Decimal::from(1)).await.unwrap();
        manager.add_to_sender("0xA", Decimal::from(1)).await.unwrap();
        manager.add_to_sender("0xC", Decimal::from(2)).await.unwrap();

        assert_eq!(manager.total().await.unwrap(), Decimal::from(2));
        let mut candidates = manager.top_candidates(2).await.unwrap();
        candidates.sort();
        // 0xA and 0xB tie for second place, both come back
        assert_eq!(candidates.len(), 3);

        manager.reset().await.unwrap();
    }
}
