//! Retry policy for store writes.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::ports::StoreError;

/// Retry policy for bookkeeping writes.
///
/// Only `StoreError::Timeout` is retried, after a fixed backoff and without a
/// limit. Every other outcome (including CAS conflicts) is returned as is.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    /// Run `op` until it returns something other than a timeout.
    pub async fn retry_on_timeout<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempts: u32 = 0;
        loop {
            match op().await {
                Err(StoreError::Timeout) => {
                    attempts = next_attempt(attempts);
                    warn!(op = what, attempts, backoff_ms = self.backoff.as_millis() as u64, "store timed out, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
                other => return other,
            }
        }
    }
}

/// The loop has no limit, so the counter sticks at its maximum.
fn next_attempt(attempts: u32) -> u32 {
    attempts.saturating_add(1)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BACKOFF)
    }
}
