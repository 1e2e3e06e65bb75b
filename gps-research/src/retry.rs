//! Bounded exponential backoff as an explicit state machine.
//!
//! ```text
//! attempt n ──ok──────────────────────────▶ Succeeded
//!      │
//!      ├─retriable, n < max──▶ Waiting(n+1, delay) ──▶ attempt n+1
//!      ├─retriable, n = max──▶ Exhausted
//!      └─non-retriable───────▶ Failed
//! ```
//!
//! [`RetryPolicy::step`] is pure so the transitions can be tested without
//! sleeping; [`retry`] drives it against a real async operation.

use std::future::Future;
use std::time::Duration;

use gps_common::config::ResearchConfig;

use crate::error::{ResearchError, Result};

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl From<&ResearchConfig> for RetryPolicy {
    fn from(config: &ResearchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_secs(config.base_backoff_secs),
            max_delay: Duration::from_secs(config.max_backoff_secs),
        }
    }
}

/// Where a retried call stands after an attempt. Attempts are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    Waiting { next_attempt: u32, delay: Duration },
    Succeeded,
    Exhausted,
    Failed,
}

/// What happened on the attempt that just finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    RetriableFailure,
    FatalFailure,
}

impl RetryPolicy {
    /// Policy that never sleeps, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after a failed `attempt` (1-based): base, 2×base, 4×base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let millis = (self.base_delay.as_millis() as u64)
            .saturating_mul(2_u64.saturating_pow(exponent))
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(millis)
    }

    /// Transition after attempt number `attempt` given its outcome.
    pub fn step(&self, attempt: u32, outcome: Outcome) -> RetryState {
        match outcome {
            Outcome::Success => RetryState::Succeeded,
            Outcome::FatalFailure => RetryState::Failed,
            Outcome::RetriableFailure if attempt >= self.max_attempts => RetryState::Exhausted,
            Outcome::RetriableFailure => RetryState::Waiting {
                next_attempt: attempt + 1,
                delay: self.delay_for(attempt),
            },
        }
    }
}

/// Run `op` under `policy`, retrying only [`ResearchError::is_retriable`] failures.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        let err = match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(call = label, attempt, "Call recovered after retries");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let outcome = if err.is_retriable() {
            Outcome::RetriableFailure
        } else {
            Outcome::FatalFailure
        };

        match policy.step(attempt, outcome) {
            RetryState::Waiting {
                next_attempt,
                delay,
            } => {
                tracing::warn!(
                    call = label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt = next_attempt;
            }
            RetryState::Exhausted => {
                tracing::warn!(call = label, attempts = attempt, error = %err, "Retries exhausted");
                return Err(ResearchError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            _ => return Err(err),
        }
    }
}
