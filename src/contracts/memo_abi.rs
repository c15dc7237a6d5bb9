//! # Memo event ABI
//!
//! The contract ABI is supplied statically as a JSON artifact (bare ABI array or a
//! Hardhat/Foundry artifact with an `abi` field). The memo event is looked up by name
//! and decoded by parameter name, so the declaration order of its inputs does not matter.

use anyhow::{Context, Result};
use ethers::abi::{Abi, Event, ParamType, RawLog, Token};
use ethers::types::{Log, H256};
use std::path::Path;

use crate::error::IndexerError;
use crate::types::RawMemoEvent;

/// Default event name emitted by the `Coffee` contract.
pub const DEFAULT_EVENT_NAME: &str = "newMemo";

const REQUIRED_PARAMS: [(&str, ParamType); 5] = [
    ("id", ParamType::Uint(256)),
    ("from", ParamType::Address),
    ("name", ParamType::String),
    ("message", ParamType::String),
    ("timestamp", ParamType::Uint(256)),
];

/// Resolved memo event description.
#[derive(Debug, Clone)]
pub struct MemoAbi {
    event: Event,
}

impl MemoAbi {
    /// Loads the ABI artifact at `path` and resolves `event_name`.
    ///
    /// Any failure here is a startup configuration error.
    pub fn load(path: impl AsRef<Path>, event_name: &str) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ABI artifact {}", path.display()))?;
        Self::from_json(&raw, event_name)
            .with_context(|| format!("Malformed ABI artifact {}", path.display()))
    }

    pub fn from_json(raw: &str, event_name: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).context("ABI artifact is not valid JSON")?;
        let abi_value = match value {
            serde_json::Value::Object(mut obj) => obj
                .remove("abi")
                .ok_or_else(|| anyhow::anyhow!("artifact object has no `abi` field"))?,
            other => other,
        };
        let abi: Abi = serde_json::from_value(abi_value).context("Failed to parse ABI")?;
        let event = abi
            .event(event_name)
            .with_context(|| format!("Event `{}` not found in ABI", event_name))?
            .clone();

        for (name, kind) in REQUIRED_PARAMS.iter() {
            let param = event
                .inputs
                .iter()
                .find(|p| p.name == *name)
                .ok_or_else(|| anyhow::anyhow!("Event `{}` has no `{}` input", event_name, name))?;
            if param.kind != *kind {
                anyhow::bail!(
                    "Event `{}` input `{}` has type {}, expected {}",
                    event_name,
                    name,
                    param.kind,
                    kind
                );
            }
        }

        Ok(Self { event })
    }

    pub fn event_name(&self) -> &str {
        &self.event.name
    }

    /// topic0 of every memo log
    pub fn signature(&self) -> H256 {
        self.event.signature()
    }

    /// Decodes one raw log. Failures are processing errors for that event only.
    pub fn decode(&self, log: &Log) -> Result<RawMemoEvent, IndexerError> {
        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        };
        let parsed = self
            .event
            .parse_log(raw)
            .map_err(|e| IndexerError::processing(None, format!("failed to decode log: {}", e)))?;

        let param = |name: &str| -> Result<Token, IndexerError> {
            parsed
                .params
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.value.clone())
                .ok_or_else(|| IndexerError::processing(None, format!("missing `{}` argument", name)))
        };

        let id = param("id")?
            .into_uint()
            .ok_or_else(|| IndexerError::processing(None, "`id` is not a uint"))?;
        let from = param("from")?
            .into_address()
            .ok_or_else(|| IndexerError::processing(None, "`from` is not an address"))?;
        let name = param("name")?
            .into_string()
            .ok_or_else(|| IndexerError::processing(None, "`name` is not a string"))?;
        let message = param("message")?
            .into_string()
            .ok_or_else(|| IndexerError::processing(None, "`message` is not a string"))?;
        let timestamp = param("timestamp")?
            .into_uint()
            .ok_or_else(|| IndexerError::processing(None, "`timestamp` is not a uint"))?;

        Ok(RawMemoEvent {
            id,
            from,
            name,
            message,
            timestamp,
            tx_hash: log.transaction_hash,
            block_number: log.block_number.map(|n| n.as_u64()),
        })
    }
}
