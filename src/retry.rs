//! Bounded exponential backoff for transient network operations.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::FetchConfig;
use crate::error::FetchError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Delay before `attempt` (1-based): base, 2×base, 4×base, ... capped at 32×base.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(5);
        self.base_delay * factor
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// retry budget is spent.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed ({}), retry {}/{} in {:?}",
                    what, e, attempt, policy.max_retries, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
