//! # Event Source
//!
//! Produces the contract's raw memo logs for one session: a log filter installed at
//! the head, a chunked backfill from the configured start block up to that head, then
//! live polling of the filter.
//!
//! The checkpoint is the highest block seen while polling. When the node forgets the
//! filter, a new one is installed and the range from the checkpoint to the new head is
//! fetched with `eth_getLogs`, so nothing between the two filters is missed.

use ethers::types::{Address, Filter, Log, H256, U256};
use log::{debug, info, warn};

use crate::chain_client::ChainClient;
use crate::error::IndexerError;
use crate::metrics;
use crate::utils::create_block_chunks;

/// Result of one poll of the live filter.
#[derive(Debug, Default)]
pub struct PollBatch {
    /// Logs to process, in delivery order. Reorged-out logs are already removed.
    pub logs: Vec<Log>,
    /// The filter was recreated during this poll.
    pub resubscribed: bool,
}

pub struct EventSource {
    address: Address,
    signature: H256,
    start_block: u64,
    chunk_size: u64,
    filter_id: Option<U256>,
    checkpoint: Option<u64>,
}

impl EventSource {
    pub fn new(address: Address, signature: H256, start_block: u64, chunk_size: u64) -> Self {
        Self {
            address,
            signature,
            start_block,
            chunk_size: chunk_size.max(1),
            filter_id: None,
            checkpoint: None,
        }
    }

    pub fn checkpoint(&self) -> Option<u64> {
        self.checkpoint
    }

    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    fn base_filter(&self) -> Filter {
        Filter::new().address(self.address).topic0(self.signature)
    }

    /// Installs the live filter and returns the head block it starts from. The filter
    /// goes in first so nothing emitted after the head read can slip through.
    pub async fn subscribe(&mut self, client: &dyn ChainClient) -> Result<u64, IndexerError> {
        let id = client.install_log_filter(&self.base_filter()).await?;
        let head = client.head_block().await?;
        debug!("[EventSource] Filter {:#x} installed at head {}", id, head);
        self.filter_id = Some(id);
        self.checkpoint = Some(head);
        Ok(head)
    }

    /// Inclusive block ranges covering `[start_block, head]`.
    pub fn backfill_ranges(&self, head: u64) -> Vec<(u64, u64)> {
        if self.start_block > head {
            return Vec::new();
        }
        create_block_chunks(self.start_block, head, self.chunk_size)
    }

    /// Historical logs for one inclusive range.
    pub async fn fetch_range(
        &self,
        client: &dyn ChainClient,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, IndexerError> {
        let filter = self.base_filter().from_block(from).to_block(to);
        let logs = retain_live(client.logs(&filter).await?);
        metrics::record_backfill_logs(logs.len());
        Ok(logs)
    }

    /// New logs since the previous poll.
    ///
    /// A subscription error recreates the filter and gap-fills from the checkpoint;
    /// a connectivity error is returned to the caller untouched.
    pub async fn poll(&mut self, client: &dyn ChainClient) -> Result<PollBatch, IndexerError> {
        let id = match self.filter_id {
            Some(id) => id,
            None => {
                return Err(IndexerError::Subscription(
                    "poll before subscribe".to_string(),
                ))
            }
        };

        let batch = match client.filter_changes(id).await {
            Ok(logs) => PollBatch {
                logs: retain_live(logs),
                resubscribed: false,
            },
            Err(e) if e.is_subscription() => {
                warn!("⚠️ [EventSource] Log filter lost ({}), resubscribing", e);
                PollBatch {
                    logs: self.resubscribe(client).await?,
                    resubscribed: true,
                }
            }
            Err(e) => return Err(e),
        };

        if let Some(highest) = batch.logs.iter().filter_map(|l| l.block_number).max() {
            let highest = highest.as_u64();
            if self.checkpoint.map_or(true, |c| highest > c) {
                self.checkpoint = Some(highest);
            }
        }
        Ok(batch)
    }

    async fn resubscribe(&mut self, client: &dyn ChainClient) -> Result<Vec<Log>, IndexerError> {
        metrics::record_resubscription();
        let resume_from = self.checkpoint.unwrap_or(self.start_block);
        let head = self.subscribe(client).await?;

        let mut gap = Vec::new();
        if resume_from <= head {
            for (from, to) in create_block_chunks(resume_from, head, self.chunk_size) {
                gap.extend(self.fetch_range(client, from, to).await?);
            }
        }
        info!(
            "🔁 [EventSource] Resubscribed at head {}, gap-filled {} logs from block {}",
            head,
            gap.len(),
            resume_from
        );
        Ok(gap)
    }
}

fn retain_live(mut logs: Vec<Log>) -> Vec<Log> {
    let before = logs.len();
    logs.retain(|l| l.removed != Some(true));
    if logs.len() != before {
        debug!("[EventSource] Skipped {} removed logs", before - logs.len());
    }
    logs
}
