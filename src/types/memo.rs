use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::conversions::{self, ConversionError};

/// Decoded arguments of one memo event plus the envelope fields the processor needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMemoEvent {
    pub id: U256,
    pub from: Address,
    pub name: String,
    pub message: String,
    pub timestamp: U256,
    pub tx_hash: Option<H256>,
    pub block_number: Option<u64>,
}

/// Canonical, persisted unit of work. One row per `memo_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoRecord {
    pub memo_id: u64,
    pub sender_address: String,
    pub name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub eth_amount: Decimal,
}

impl MemoRecord {
    /// Builds the record from a decoded event and the transferred value in wei.
    pub fn from_event(event: &RawMemoEvent, value_wei: U256) -> Result<Self, ConversionError> {
        Ok(Self {
            memo_id: conversions::u256_to_u64(event.id)?,
            sender_address: conversions::address_to_string(event.from),
            name: event.name.clone(),
            message: event.message.clone(),
            timestamp: conversions::unix_to_datetime(event.timestamp)?,
            eth_amount: conversions::wei_to_eth(value_wei)?,
        })
    }
}
