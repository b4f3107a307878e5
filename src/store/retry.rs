//! Bounded fixed-delay retry for transient backend failures

use crate::error::PersistenceError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy for idempotent writes
///
/// Only errors flagged `transient` are retried; anything else surfaces on
/// the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    /// 3 attempts, 100ms apart
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, PersistenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
    {
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.transient && attempt < self.max_attempts => {
                    log::warn!(
                        "⏳ {} attempt {} of {} failed, retrying in {}ms: {}",
                        e.op,
                        attempt,
                        self.max_attempts,
                        self.delay.as_millis(),
                        e.message
                    );
                    sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
