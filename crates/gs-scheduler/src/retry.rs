//! Retry policy for control-plane calls
//!
//! Only `RateLimited` failures are retried. Any other classification is
//! returned to the caller untouched on the first attempt.

use std::future::Future;
use std::time::Duration;

use gs_common::RemoteResult;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1000),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }

    pub async fn run<F, Fut, T>(&self, mut operation: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limited() && attempt < max_attempts => {
                    let delay = self.backoff_for(attempt);
                    warn!(
                        operation = %err.operation,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    metrics::counter!("gatesync_scheduler_rate_limited_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_rate_limited() {
                        warn!(
                            operation = %err.operation,
                            attempts = attempt,
                            "Rate limited on every attempt, giving up"
                        );
                    } else {
                        debug!(operation = %err.operation, kind = ?err.kind, "Not retrying");
                    }
                    return Err(err);
                }
            }
        }
    }
}
