//! Reconnect delay policy.
//!
//! One explicit policy drives every reconnect. `Fixed` matches the historic behaviour
//! (constant 5s between attempts); `Exponential` doubles from `initial_ms` up to `max_ms`.
//! Retries are unbounded either way: the loop only ends on process shutdown.

use serde::Deserialize;
use std::time::Duration;
use tokio_retry::strategy::{ExponentialBackoff, FixedInterval};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RetryPolicy {
    Fixed {
        #[serde(default = "default_fixed_delay_ms")]
        delay_ms: u64,
    },
    Exponential {
        #[serde(default = "default_initial_ms")]
        initial_ms: u64,
        #[serde(default = "default_max_ms")]
        max_ms: u64,
    },
}

fn default_fixed_delay_ms() -> u64 {
    5000
}
fn default_initial_ms() -> u64 {
    1000
}
fn default_max_ms() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed {
            delay_ms: default_fixed_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        RetryPolicy::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Infinite iterator of delays. A fresh iterator restarts the backoff.
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match *self {
            RetryPolicy::Fixed { delay_ms } => Box::new(FixedInterval::from_millis(delay_ms)),
            RetryPolicy::Exponential { initial_ms, max_ms } => {
                // ExponentialBackoff yields base^n * factor: base 2 with factor initial/2
                // gives initial, 2*initial, 4*initial, ...
                let factor = (initial_ms / 2).max(1);
                Box::new(
                    ExponentialBackoff::from_millis(2)
                        .factor(factor)
                        .max_delay(Duration::from_millis(max_ms.max(initial_ms))),
                )
            }
        }
    }
}
