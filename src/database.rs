use crate::ledger::{Ledger, UpsertOutcome};
use crate::settings::Database;
use crate::types::MemoRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Connection, Pool, Postgres, Row};
use std::time::Duration;

/// PostgreSQL connection pool type alias.
pub type DbPool = Pool<Postgres>;

/// Database schema name
pub const SCHEMA: &str = "memo_indexer";

/// Connects with capped exponential backoff, then makes sure the schema exists.
pub async fn connect(settings: &Database) -> Result<DbPool> {
    if settings.url.is_empty() {
        anyhow::bail!("database.url is empty (set DATABASE_URL)");
    }

    let mut last_err: Option<anyhow::Error> = None;
    let max_attempts = settings.connect_attempts.max(1);
    for attempt in 1..=max_attempts {
        match PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&settings.url)
            .await
        {
            Ok(pool) => {
                log::info!(
                    "✅ Connected to database (attempt {}/{}).",
                    attempt,
                    max_attempts
                );
                match initialize_database(&pool).await {
                    Ok(()) => return Ok(pool),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(e) => {
                last_err = Some(e.into());
            }
        }
        if attempt == max_attempts {
            break;
        }
        let delay_ms = (1u64 << attempt.min(6)) * 200; // 400ms .. 12.8s
        log::warn!(
            "DB connect/init attempt {}/{} failed. Retrying in {} ms...",
            attempt,
            max_attempts,
            delay_ms
        );
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Unknown DB connection error")))
}

/// Idempotent schema setup, serialized across instances with an advisory lock.
pub async fn initialize_database(pool: &DbPool) -> Result<()> {
    const SCHEMA_LOCK_ID: i64 = 0x4D454D4F_494E4458; // "MEMOINDX"

    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_ID)
        .execute(tx.as_mut())
        .await?;

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", SCHEMA))
        .execute(tx.as_mut())
        .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {}.memos (
            id BIGSERIAL PRIMARY KEY,
            memo_id BIGINT UNIQUE NOT NULL,
            sender_address VARCHAR(42) NOT NULL,
            name VARCHAR(255) NOT NULL,
            message TEXT NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL,
            eth_amount NUMERIC(38, 18) NOT NULL CHECK (eth_amount >= 0),
            created_at TIMESTAMPTZ DEFAULT NOW(),
            updated_at TIMESTAMPTZ DEFAULT NOW()
        )",
        SCHEMA
    ))
    .execute(tx.as_mut())
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_memos_timestamp ON {}.memos(timestamp DESC, memo_id DESC)",
        SCHEMA
    ))
    .execute(tx.as_mut())
    .await?;

    tx.commit().await?;
    log::info!("Database schema {} ready.", SCHEMA);
    Ok(())
}

/// PostgreSQL-backed [`Ledger`].
#[derive(Clone)]
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn row_to_record(row: &PgRow) -> Result<MemoRecord> {
    let memo_id: i64 = row.try_get("memo_id")?;
    Ok(MemoRecord {
        memo_id: u64::try_from(memo_id).context("negative memo_id in ledger")?,
        sender_address: row.try_get("sender_address")?,
        name: row.try_get("name")?,
        message: row.try_get("message")?,
        timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
        eth_amount: row.try_get::<Decimal, _>("eth_amount")?,
    })
}

const SELECT_COLUMNS: &str = "memo_id, sender_address, name, message, timestamp, eth_amount";

#[async_trait]
impl Ledger for PgLedger {
    async fn upsert(&self, record: &MemoRecord) -> Result<UpsertOutcome> {
        let memo_id = i64::try_from(record.memo_id).context("memo_id exceeds BIGINT range")?;
        // xmax = 0 only for rows inserted by this statement; a conflict update sets it.
        let row = sqlx::query(&format!(
            "INSERT INTO {}.memos (memo_id, sender_address, name, message, timestamp, eth_amount)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (memo_id) DO UPDATE SET
                sender_address = EXCLUDED.sender_address,
                name = EXCLUDED.name,
                message = EXCLUDED.message,
                timestamp = EXCLUDED.timestamp,
                eth_amount = EXCLUDED.eth_amount,
                updated_at = NOW()
             RETURNING (xmax = 0) AS inserted",
            SCHEMA
        ))
        .bind(memo_id)
        .bind(&record.sender_address)
        .bind(&record.name)
        .bind(&record.message)
        .bind(record.timestamp)
        .bind(record.eth_amount)
        .fetch_one(&self.pool)
        .await?;

        let inserted: bool = row.try_get("inserted")?;
        Ok(if inserted {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn get(&self, memo_id: u64) -> Result<Option<MemoRecord>> {
        let memo_id = i64::try_from(memo_id).context("memo_id exceeds BIGINT range")?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM {}.memos WHERE memo_id = $1",
            SELECT_COLUMNS, SCHEMA
        ))
        .bind(memo_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_recent(&self, limit: Option<usize>) -> Result<Vec<MemoRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM {}.memos ORDER BY timestamp DESC, memo_id DESC LIMIT $1",
            SELECT_COLUMNS, SCHEMA
        ))
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn all_records(&self) -> Result<Vec<MemoRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM {}.memos ORDER BY memo_id ASC",
            SELECT_COLUMNS, SCHEMA
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query(&format!("SELECT COUNT(*) AS count FROM {}.memos", SCHEMA))
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;
        Ok(count as u64)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
