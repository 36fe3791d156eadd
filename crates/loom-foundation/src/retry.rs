//! Backoff and bounded retry for artifact I/O.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff strategy for retry delays
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed { delay_ms: u64 },
    /// Linear backoff with increment
    Linear {
        initial_delay_ms: u64,
        increment_ms: u64,
    },
    /// Exponential backoff
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
    },
    /// Exponential backoff with jitter
    ExponentialWithJitter {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        jitter_ms: u64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::ExponentialWithJitter {
            initial_delay_ms: 50,
            max_delay_ms: 2_000,
            jitter_ms: 20,
        }
    }
}

impl BackoffStrategy {
    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Self::Linear {
                initial_delay_ms,
                increment_ms,
            } => Duration::from_millis(
                initial_delay_ms.saturating_add(increment_ms.saturating_mul(attempt as u64)),
            ),
            Self::Exponential {
                initial_delay_ms,
                max_delay_ms,
            } => Duration::from_millis(exponential(*initial_delay_ms, *max_delay_ms, attempt)),
            Self::ExponentialWithJitter {
                initial_delay_ms,
                max_delay_ms,
                jitter_ms,
            } => {
                let capped = exponential(*initial_delay_ms, *max_delay_ms, attempt);
                let jitter = if *jitter_ms > 0 {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(0..*jitter_ms) as i64 - (*jitter_ms as i64 / 2)
                } else {
                    0
                };
                Duration::from_millis((capped as i64 + jitter).max(0) as u64)
            }
        }
    }
}

fn exponential(initial_ms: u64, max_ms: u64, attempt: u32) -> u64 {
    initial_ms
        .saturating_mul(2u64.pow(attempt.min(10)))
        .min(max_ms)
}

/// How many times transient failures are retried, and how long to wait between tries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// Retries immediately; for tests and local stores.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Fixed { delay_ms: 0 },
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
