//! # Memo Indexer
//!
//! Runs the indexer or queries what it has stored.
//!
//! ```bash
//! cargo run --bin memo_indexer -- run
//! cargo run --bin memo_indexer -- memos --limit 20
//! cargo run --bin memo_indexer -- stats
//! cargo run --bin memo_indexer -- rebuild-stats
//! cargo run --bin memo_indexer -- health
//! ```
//!
//! Press Ctrl+C to stop `run` gracefully.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use memo_indexer::{
    connector::WsConnector,
    contracts::MemoAbi,
    database::{self, PgLedger},
    event_processor::EventProcessor,
    indexer::{Indexer, IndexerOptions},
    ledger::Ledger,
    query::{HealthReport, QueryService},
    redis_manager::connect_aggregates,
    settings::{Database, Settings},
    stats::{AggregateStore, StatsAggregator},
};
#[cfg(feature = "redis")]
use memo_indexer::redis_manager::RedisManager;
#[cfg(not(feature = "redis"))]
use memo_indexer::stats::MemoryAggregateStore;
use std::sync::Arc;

const LOG_BUS_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(
    name = "memo_indexer",
    about = "Indexes on-chain memo events into PostgreSQL with live Redis aggregates",
    long_about = "
Indexes the memo events of one contract: full backfill on every connection, then live
polling of a log filter. Records land in PostgreSQL, totals and the leaderboard in Redis.

ENVIRONMENT VARIABLES:
  MEMO_NODE_WS_URL         Node WebSocket URL (http(s) is rewritten to ws(s))
  MEMO_NODE_API_KEY        Node API key (fallback: ALCHEMY_API_KEY)
  MEMO_CONTRACT_ADDRESS    Contract emitting the memo event
  MEMO_CONTRACT_ABI_PATH   ABI artifact path
  MEMO_START_BLOCK         First block to backfill
  DATABASE_URL             PostgreSQL connection string
  REDIS_URL                Redis connection string
",
    version
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = "Config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, backfill and index live events until Ctrl+C
    Run,

    /// Print indexed memos, newest first
    Memos {
        /// Maximum number of memos to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print total ETH received and the top supporter
    Stats,

    /// Reset the aggregates and replay every ledger record (indexer must be stopped)
    #[command(name = "rebuild-stats")]
    RebuildStats,

    /// Check ledger and aggregate store connectivity
    Health,
}

fn init_logging(level: &str) {
    #[cfg(feature = "observability")]
    {
        let max_level = level
            .parse::<tracing::Level>()
            .unwrap_or(tracing::Level::INFO);
        tracing_subscriber::fmt()
            .json()
            .with_max_level(max_level)
            .init();
    }
    #[cfg(not(feature = "observability"))]
    {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    }
}

async fn build_ledger(settings: &Database) -> Result<Arc<dyn Ledger>> {
    let pool = database::connect(settings).await?;
    Ok(Arc::new(PgLedger::new(pool)))
}

/// One connection attempt per store; whatever is down shows up in the report.
async fn health_report(settings: &Settings) -> HealthReport {
    let database = Database {
        connect_attempts: 1,
        ..settings.database.clone()
    };
    let ledger = build_ledger(&database).await;

    #[cfg(feature = "redis")]
    let aggregates = RedisManager::new(settings.redis.clone())
        .await
        .map(|redis| Arc::new(redis) as Arc<dyn AggregateStore>);
    #[cfg(not(feature = "redis"))]
    let aggregates: Result<Arc<dyn AggregateStore>> = Ok(Arc::new(MemoryAggregateStore::new()));

    HealthReport::check(ledger, aggregates).await
}

async fn run(settings: Settings) -> Result<()> {
    settings.validate()?;

    let abi = Arc::new(
        MemoAbi::load(&settings.contract.abi_path, &settings.contract.event_name)
            .context("Failed to load contract ABI")?,
    );
    info!(
        "✅ ABI loaded: event {} ({:?})",
        abi.event_name(),
        abi.signature()
    );

    #[cfg(feature = "observability")]
    {
        if settings.metrics.enabled {
            memo_indexer::metrics::install_prometheus_exporter(settings.metrics.port)?;
        }
    }

    let ledger = build_ledger(&settings.database).await?;
    let (store, log_bus) = connect_aggregates(&settings.redis, LOG_BUS_CAPACITY).await;
    let stats = Arc::new(StatsAggregator::new(store));

    let processor = Arc::new(EventProcessor::new(
        abi.clone(),
        ledger,
        stats,
        log_bus.clone(),
    ));
    let options = IndexerOptions::from_settings(&settings, &abi)?;
    let connector = WsConnector::new(settings.ws_endpoint());
    let indexer = Indexer::new(connector, processor, log_bus, options);

    println!("🚀 Starting Memo Indexer");
    println!("═══════════════════════════════════════════════════════════════════\n");

    indexer
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("❌ Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            println!("\n🛑 Shutdown signal received, stopping indexer...");
        })
        .await;

    println!("✅ Memo Indexer stopped");
    Ok(())
}

async fn query_service(settings: &Settings) -> Result<(QueryService, Arc<dyn Ledger>, Arc<StatsAggregator>)> {
    let ledger = build_ledger(&settings.database).await?;
    let (store, _log_bus) = connect_aggregates(&settings.redis, LOG_BUS_CAPACITY).await;
    let stats = Arc::new(StatsAggregator::new(store));
    Ok((QueryService::new(ledger.clone(), stats.clone()), ledger, stats))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::from_path(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config))?;
    init_logging(&settings.log.level);

    match cli.command {
        Commands::Run => run(settings).await?,
        Commands::Memos { limit } => {
            let (query, _, _) = query_service(&settings).await?;
            let memos = query.list_memos(limit).await?;
            println!("{}", serde_json::to_string_pretty(&memos)?);
        }
        Commands::Stats => {
            let (query, _, _) = query_service(&settings).await?;
            let snapshot = query.stats().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::RebuildStats => {
            let (_, ledger, stats) = query_service(&settings).await?;
            let replayed = stats.rebuild_from_ledger(ledger.as_ref()).await?;
            println!("✅ Replayed {} memos, total_eth = {}", replayed, stats.total().await?);
        }
        Commands::Health => {
            let report = health_report(&settings).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_healthy() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
