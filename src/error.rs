//! Error taxonomy for the indexing pipeline.
//!
//! Each variant is handled at a different loop boundary:
//!
//! - `Connectivity`: the session is torn down and the indexer reconnects after a delay
//! - `Subscription`: the log filter is recreated in place, the connection is kept
//! - `Processing`: the single event is dropped, the batch continues
//! - `AggregateStore`: logged only, never blocks persistence
//! - `Config`: fatal at startup

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("processing error (memo {memo_id:?}): {reason}")]
    Processing {
        memo_id: Option<u64>,
        reason: String,
    },

    #[error("aggregate store error: {0}")]
    AggregateStore(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl IndexerError {
    pub fn processing(memo_id: Option<u64>, reason: impl Into<String>) -> Self {
        Self::Processing {
            memo_id,
            reason: reason.into(),
        }
    }

    /// `true` when the error only invalidates the log filter, not the connection.
    pub fn is_subscription(&self) -> bool {
        matches!(self, Self::Subscription(_))
    }

    /// `true` when the session must be torn down and re-established.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert!(IndexerError::Subscription("filter not found".into()).is_subscription());
        assert!(IndexerError::Connectivity("ws closed".into()).is_connectivity());
        assert!(!IndexerError::processing(Some(3), "no tx").is_connectivity());
    }

    #[test]
    fn test_processing_display_includes_memo_id() {
        let err = IndexerError::processing(Some(7), "transaction not found");
        assert_eq!(
            err.to_string(),
            "processing error (memo Some(7)): transaction not found"
        );
    }
}
