// Retry combinator with jittered delays
//
// The delay source is behind the `Sleeper` trait so callers can run the
// combinator against a fake clock in tests.

use async_trait::async_trait;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Something that can wait for a duration
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy allowing `retries` extra attempts with a uniform delay in `min..=max`
    pub fn new(retries: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: retries + 1,
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    /// A random delay within the configured range
    pub fn jittered_delay(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        if max <= min {
            return self.min_delay;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Run `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or the policy runs out of attempts.
///
/// `operation` receives the 1-based attempt number. The last error is
/// returned unchanged.
pub async fn with_retry<T, E, Op, Fut, P>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut operation: Op,
    is_retryable: P,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Succeeded on attempt {}/{}", attempt, policy.max_attempts);
                }
                return Ok(value);
            }
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                let delay = policy.jittered_delay();
                warn!(
                    "Attempt {}/{} failed ({}), retrying in {}ms",
                    attempt,
                    policy.max_attempts,
                    e,
                    delay.as_millis()
                );
                sleeper.sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
