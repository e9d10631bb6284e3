//! Bounded retry for persistence side effects

use crate::domain::shared::result::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy: attempt count and base backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Delay before retry number `attempt` (1-based): exponential with jitter
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.as_millis() as u64 * (1u64 << (attempt - 1).min(6));
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50))
    }
}

/// Run `op` until it succeeds or the policy is exhausted
///
/// Transition conflicts are not retried.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() || attempt >= policy.attempts => return Err(e),
            Err(e) => {
                warn!("{} failed (attempt {}/{}): {}", what, attempt, policy.attempts, e);
                tokio::time::sleep(policy.delay(attempt)).await;
                attempt += 1;
            }
        }
    }
}
