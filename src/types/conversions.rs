use chrono::{DateTime, TimeZone, Utc};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;

/// Decimals of the chain's native currency (wei per ETH = 10^18).
pub const NATIVE_DECIMALS: u32 = 18;

/// Converts a wei amount into an exact, normalized ETH `Decimal`.
///
/// `1_500_000_000_000_000_000` wei becomes `1.5`. Amounts that do not fit the 96-bit
/// mantissa of `Decimal` (about 7.9e10 ETH) are rejected rather than rounded.
pub fn wei_to_eth(value: U256) -> Result<Decimal, ConversionError> {
    let wei = u128::try_from(value).map_err(|_| ConversionError::Overflow)?;
    let wei = i128::try_from(wei).map_err(|_| ConversionError::Overflow)?;
    Decimal::try_from_i128_with_scale(wei, NATIVE_DECIMALS)
        .map(|d| d.normalize())
        .map_err(|e| ConversionError::InvalidDecimal(e.to_string()))
}

/// Upstream timestamps are seconds since the unix epoch.
pub fn unix_to_datetime(value: U256) -> Result<DateTime<Utc>, ConversionError> {
    let secs = u64::try_from(value).map_err(|_| ConversionError::Overflow)?;
    let secs = i64::try_from(secs).map_err(|_| ConversionError::Overflow)?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(ConversionError::InvalidTimestamp(secs))
}

pub fn u256_to_u64(value: U256) -> Result<u64, ConversionError> {
    u64::try_from(value).map_err(|_| ConversionError::Overflow)
}

// EIP-55 checksummed, always 42 chars
pub fn address_to_string(addr: Address) -> String {
    ethers::utils::to_checksum(&addr, None)
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),
    #[error("Overflow in conversion")]
    Overflow,
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}
