//! Shared fixtures for integration tests: a scripted chain client, a connector that
//! hands it out, and memo log builders.

#![allow(dead_code)]

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, Filter, Log, H256, U256, U64};
use memo_indexer::chain_client::ChainClient;
use memo_indexer::connector::Connector;
use memo_indexer::contracts::{MemoAbi, DEFAULT_EVENT_NAME};
use memo_indexer::error::IndexerError;
use memo_indexer::event_processor::EventProcessor;
use memo_indexer::indexer::IndexerOptions;
use memo_indexer::ledger::{Ledger, MemoryLedger};
use memo_indexer::log_bus::LogBus;
use memo_indexer::retry::RetryPolicy;
use memo_indexer::stats::{MemoryAggregateStore, StatsAggregator};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ABI_JSON: &str = include_str!("../../abi/Coffee.json");
pub const ONE_ETH: u128 = 1_000_000_000_000_000_000;

pub fn coffee_abi() -> Arc<MemoAbi> {
    Arc::new(MemoAbi::from_json(ABI_JSON, DEFAULT_EVENT_NAME).unwrap())
}

pub fn contract() -> Address {
    Address::repeat_byte(0xC0)
}

pub fn sender(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn tx_hash(memo_id: u64) -> H256 {
    H256::from_low_u64_be(0xF000 + memo_id)
}

/// A memo log as the node would deliver it, `removed == false`.
pub fn memo_log(abi: &MemoAbi, memo_id: u64, from: Address, block: u64) -> Log {
    memo_log_at(abi, memo_id, from, block, 1_700_000_000 + memo_id)
}

pub fn memo_log_at(abi: &MemoAbi, memo_id: u64, from: Address, block: u64, timestamp: u64) -> Log {
    let mut topic = [0u8; 32];
    topic[12..].copy_from_slice(from.as_bytes());
    Log {
        address: contract(),
        topics: vec![abi.signature(), H256::from(topic)],
        data: Bytes::from(encode(&[
            Token::Uint(U256::from(memo_id)),
            Token::Uint(U256::from(timestamp)),
            Token::String(format!("supporter {}", memo_id)),
            Token::String("thanks for the coffee".to_string()),
        ])),
        transaction_hash: Some(tx_hash(memo_id)),
        block_number: Some(U64::from(block)),
        removed: Some(false),
        ..Default::default()
    }
}

struct FilterStep {
    head: Option<u64>,
    result: Result<Vec<Log>, IndexerError>,
}

#[derive(Default)]
struct ChainState {
    head: u64,
    history: Vec<Log>,
    steps: VecDeque<FilterStep>,
    tx_values: HashMap<H256, U256>,
    tx_lookup_down: bool,
    filters_installed: u64,
    log_ranges: Vec<(u64, u64)>,
}

/// Scripted node. `eth_getLogs` serves `history` by block range; each filter poll
/// consumes one scripted step, or returns nothing once the script is exhausted.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(head: u64) -> Arc<Self> {
        let chain = Self::default();
        chain.state.lock().unwrap().head = head;
        Arc::new(chain)
    }

    /// Adds a historical log and registers its transaction value.
    pub fn add_history(&self, log: Log, value_wei: u128) {
        let mut state = self.state.lock().unwrap();
        if let Some(hash) = log.transaction_hash {
            state.tx_values.insert(hash, U256::from(value_wei));
        }
        state.history.push(log);
    }

    pub fn set_tx_value(&self, hash: H256, value_wei: u128) {
        self.state
            .lock()
            .unwrap()
            .tx_values
            .insert(hash, U256::from(value_wei));
    }

    /// Next poll returns `result`.
    pub fn script_poll(&self, result: Result<Vec<Log>, IndexerError>) {
        self.state
            .lock()
            .unwrap()
            .steps
            .push_back(FilterStep { head: None, result });
    }

    /// Next poll moves the head to `head` before returning `result`.
    pub fn script_poll_at_head(&self, head: u64, result: Result<Vec<Log>, IndexerError>) {
        self.state.lock().unwrap().steps.push_back(FilterStep {
            head: Some(head),
            result,
        });
    }

    /// Every transaction lookup fails as if the socket had dropped.
    pub fn set_tx_lookup_down(&self, down: bool) {
        self.state.lock().unwrap().tx_lookup_down = down;
    }

    pub fn filters_installed(&self) -> u64 {
        self.state.lock().unwrap().filters_installed
    }

    pub fn log_ranges(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().log_ranges.clone()
    }

    pub fn pending_steps(&self) -> usize {
        self.state.lock().unwrap().steps.len()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn head_block(&self) -> Result<u64, IndexerError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, IndexerError> {
        let from = filter.get_from_block().map(|b| b.as_u64()).unwrap_or(0);
        let to = filter.get_to_block().map(|b| b.as_u64()).unwrap_or(u64::MAX);
        let mut state = self.state.lock().unwrap();
        state.log_ranges.push((from, to));
        Ok(state
            .history
            .iter()
            .filter(|l| {
                l.block_number
                    .map(|b| (from..=to).contains(&b.as_u64()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn install_log_filter(&self, _filter: &Filter) -> Result<U256, IndexerError> {
        let mut state = self.state.lock().unwrap();
        state.filters_installed += 1;
        Ok(U256::from(state.filters_installed))
    }

    async fn filter_changes(&self, _id: U256) -> Result<Vec<Log>, IndexerError> {
        let mut state = self.state.lock().unwrap();
        match state.steps.pop_front() {
            Some(step) => {
                if let Some(head) = step.head {
                    state.head = head;
                }
                step.result
            }
            None => Ok(Vec::new()),
        }
    }

    async fn transaction_value(&self, tx_hash: H256) -> Result<U256, IndexerError> {
        let state = self.state.lock().unwrap();
        if state.tx_lookup_down {
            return Err(IndexerError::Connectivity("websocket closed".to_string()));
        }
        state.tx_values.get(&tx_hash).copied().ok_or_else(|| {
            IndexerError::processing(None, format!("transaction {:?} not found", tx_hash))
        })
    }
}

/// Hands out scripted connection results, then `chain` forever.
pub struct MockConnector {
    chain: Arc<MockChain>,
    failures: Mutex<VecDeque<IndexerError>>,
    attempts: AtomicU64,
}

impl MockConnector {
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self {
            chain,
            failures: Mutex::new(VecDeque::new()),
            attempts: AtomicU64::new(0),
        }
    }

    /// The next `connect()` calls fail with these errors, in order.
    pub fn fail_next(self, errors: Vec<IndexerError>) -> Self {
        self.failures.lock().unwrap().extend(errors);
        self
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Client = MockChain;

    async fn connect(&self) -> Result<Arc<MockChain>, IndexerError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(self.chain.clone()),
        }
    }

    fn describe(&self) -> String {
        "mock://chain".to_string()
    }
}

/// In-memory pipeline: ledger, aggregates, log bus and processor.
pub struct Pipeline {
    pub abi: Arc<MemoAbi>,
    pub ledger: Arc<MemoryLedger>,
    pub stats: Arc<StatsAggregator>,
    pub log_bus: LogBus,
    pub processor: Arc<EventProcessor>,
}

pub fn pipeline() -> Pipeline {
    let abi = coffee_abi();
    let ledger = Arc::new(MemoryLedger::new());
    let stats = Arc::new(StatsAggregator::new(Arc::new(MemoryAggregateStore::new())));
    let log_bus = LogBus::new(256);
    let processor = Arc::new(EventProcessor::new(
        abi.clone(),
        ledger.clone() as Arc<dyn Ledger>,
        stats.clone(),
        log_bus.clone(),
    ));
    Pipeline {
        abi,
        ledger,
        stats,
        log_bus,
        processor,
    }
}

pub fn options(abi: &MemoAbi, start_block: u64, chunk_size: u64) -> IndexerOptions {
    IndexerOptions {
        contract: contract(),
        event_signature: abi.signature(),
        start_block,
        backfill_chunk_size: chunk_size,
        poll_interval: Duration::from_millis(100),
        reconnect: RetryPolicy::fixed(Duration::from_secs(5)),
    }
}

pub fn eth(wei: u128) -> rust_decimal::Decimal {
    rust_decimal::Decimal::from_i128_with_scale(wei as i128, 18).normalize()
}
