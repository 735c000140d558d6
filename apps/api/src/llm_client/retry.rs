//! Bounded retry with exponential backoff for transient completion failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::llm_client::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    #[cfg(test)]
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Backoff before attempt number `attempt` (0-based): 0, base, 2·base, 4·base…
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay
            .saturating_mul(1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX))
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    /// The last error is returned when every attempt fails.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let delay = self.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    warn!(
                        "Completion attempt {}/{} failed ({}), retrying after {}ms",
                        attempt + 1,
                        attempts,
                        e,
                        self.delay_for(attempt + 1).as_millis()
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
