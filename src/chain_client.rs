//! # Chain Client
//!
//! The slice of node RPC the indexer relies on, behind a trait so the session logic
//! can run against any transport (and against scripted clients in tests).
//!
//! Node errors are classified here: an invalid/expired log filter becomes
//! `IndexerError::Subscription`, everything else from the transport becomes
//! `IndexerError::Connectivity`.

use async_trait::async_trait;
use ethers::providers::{FilterKind, JsonRpcClient, Middleware, Provider, ProviderError};
use ethers::types::{Filter, Log, H256, U256};

use crate::error::IndexerError;

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number.
    async fn head_block(&self) -> Result<u64, IndexerError>;

    /// Historical logs (`eth_getLogs`).
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, IndexerError>;

    /// Installs a server-side log filter (`eth_newFilter`) and returns its id.
    async fn install_log_filter(&self, filter: &Filter) -> Result<U256, IndexerError>;

    /// Entries observed since the previous poll of `id` (`eth_getFilterChanges`).
    async fn filter_changes(&self, id: U256) -> Result<Vec<Log>, IndexerError>;

    /// Native-currency value transferred by a transaction, in wei.
    async fn transaction_value(&self, tx_hash: H256) -> Result<U256, IndexerError>;
}

#[async_trait]
impl<P> ChainClient for Provider<P>
where
    P: JsonRpcClient + 'static,
{
    async fn head_block(&self) -> Result<u64, IndexerError> {
        self.get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(classify_provider_error)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, IndexerError> {
        self.get_logs(filter).await.map_err(classify_provider_error)
    }

    async fn install_log_filter(&self, filter: &Filter) -> Result<U256, IndexerError> {
        self.new_filter(FilterKind::Logs(filter))
            .await
            .map_err(classify_provider_error)
    }

    async fn filter_changes(&self, id: U256) -> Result<Vec<Log>, IndexerError> {
        self.get_filter_changes::<_, Log>(id)
            .await
            .map_err(classify_provider_error)
    }

    async fn transaction_value(&self, tx_hash: H256) -> Result<U256, IndexerError> {
        match self.get_transaction(tx_hash).await {
            Ok(Some(tx)) => Ok(tx.value),
            Ok(None) => Err(IndexerError::processing(
                None,
                format!("transaction {:?} not found", tx_hash),
            )),
            Err(e) => Err(classify_provider_error(e)),
        }
    }
}

pub fn classify_provider_error(err: ProviderError) -> IndexerError {
    let message = err.to_string();
    if is_subscription_error(&message) {
        IndexerError::Subscription(message)
    } else {
        IndexerError::Connectivity(message)
    }
}

/// Nodes phrase this differently: geth says "filter not found", others report
/// expired/unknown filters.
pub fn is_subscription_error(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("filter not found")
        || msg.contains("filter does not exist")
        || (msg.contains("filter")
            && (msg.contains("expired") || msg.contains("unknown") || msg.contains("invalid")))
}
