//! Bounded retry for store steps that hit `PersistenceUnavailable`.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use ccbuilder_core::defaults::{STORE_RETRY_ATTEMPTS, STORE_RETRY_BACKOFF_MS};
use ccbuilder_core::Result;

/// How often and how patiently to retry a transient store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt; doubles after each retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: STORE_RETRY_ATTEMPTS,
            backoff: Duration::from_millis(STORE_RETRY_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }
}

/// Run `step`, retrying while it fails with a transient error.
///
/// Non-transient errors and the last transient error are returned as is.
pub async fn with_store_retry<T, F, Fut>(policy: RetryPolicy, op: &str, mut step: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut delay = policy.backoff;
    let mut attempt = 1;

    loop {
        match step().await {
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    subsystem = "jobs",
                    component = "retry",
                    op,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Store unavailable, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            other => return other,
        }
    }
}
