//! # Chain Connector
//!
//! Opens streaming sessions to the node endpoint. Supervision (teardown, delay,
//! retry forever) lives in [`crate::indexer::Indexer`]; a connector only knows how to
//! produce one fresh handle per attempt.

use async_trait::async_trait;
use ethers::providers::{Provider, Ws};
use log::info;
use std::sync::Arc;

use crate::chain_client::ChainClient;
use crate::error::IndexerError;

#[async_trait]
pub trait Connector: Send + Sync {
    type Client: ChainClient + 'static;

    /// Establishes a new session or fails with `IndexerError::Connectivity`.
    async fn connect(&self) -> Result<Arc<Self::Client>, IndexerError>;

    /// Endpoint description safe to print (no credentials).
    fn describe(&self) -> String;
}

/// WebSocket connector (`eth_*` over a persistent ws session).
pub struct WsConnector {
    endpoint: String,
}

impl WsConnector {
    /// `endpoint` must already be a ws(s) URL with credentials, see
    /// [`crate::settings::Settings::ws_endpoint`].
    pub fn new(endpoint: String) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Client = Provider<Ws>;

    async fn connect(&self) -> Result<Arc<Provider<Ws>>, IndexerError> {
        info!("🔌 [Connector] Connecting to WebSocket: {}", self.describe());
        let provider = Provider::<Ws>::connect(&self.endpoint)
            .await
            .map_err(|e| IndexerError::Connectivity(format!("failed to connect: {}", e)))?;
        info!("✅ [Connector] WebSocket connected");
        Ok(Arc::new(provider))
    }

    fn describe(&self) -> String {
        redact_endpoint(&self.endpoint)
    }
}

/// Drops the last path segment when it looks like an API key.
pub fn redact_endpoint(endpoint: &str) -> String {
    match url::Url::parse(endpoint) {
        Ok(mut url) => {
            let segments: Vec<String> = url
                .path_segments()
                .map(|s| s.map(str::to_string).collect())
                .unwrap_or_default();
            if let Some(last) = segments.last() {
                if last.len() >= 16 {
                    let mut redacted = segments.clone();
                    if let Some(tail) = redacted.last_mut() {
                        *tail = "***".to_string();
                    }
                    url.set_path(&redacted.join("/"));
                }
            }
            url.to_string()
        }
        Err(_) => endpoint.to_string(),
    }
}
